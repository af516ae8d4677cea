//! src/client.rs
//!
//! Async bus client. One TCP connection per process; requests are matched
//! to replies by id, deliveries are routed to the `Subscription` channels
//! registered for their topic or pattern. On a broken connection the io
//! task reconnects with exponential backoff and re-issues every registered
//! subscription; requests in flight at that moment fail back to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use dustbot_common::error::{Error, Result};

use crate::protocol::{Command, Reply, Request, ServerFrame};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DELIVERY_BUFFER_SIZE: usize = 10_000;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(250);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(8);
const MAX_LINE_LENGTH: usize = 512 * 1024;

/// One record delivered to a subscriber. `pattern` is set when the
/// subscription was a `PSUBSCRIBE`; `topic` is always the concrete topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub pattern: Option<String>,
    pub payload: String,
}

pub struct Subscription {
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    /// `None` when the client is gone for good.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct SubRegistry {
    topics: HashMap<String, Vec<mpsc::Sender<Delivery>>>,
    patterns: HashMap<String, Vec<mpsc::Sender<Delivery>>>,
}

struct ClientInner {
    addr: String,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Reply>>,
    subs: Mutex<SubRegistry>,
    out_tx: mpsc::Sender<String>,
}

/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<ClientInner>,
}

impl BusClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Bus(format!("connect to {addr}: {e}")))?;
        let (out_tx, out_rx) = mpsc::channel::<String>(1024);
        let inner = Arc::new(ClientInner {
            addr: addr.to_string(),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            subs: Mutex::new(SubRegistry::default()),
            out_tx,
        });
        tokio::spawn(io_task(Arc::downgrade(&inner), stream, out_rx));
        Ok(Self { inner })
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.request(Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn subscribe(&self, topics: &[&str]) -> Result<Subscription> {
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        self.subscribe_all(&topics, &[]).await
    }

    pub async fn psubscribe(&self, patterns: &[&str]) -> Result<Subscription> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        self.subscribe_all(&[], &patterns).await
    }

    /// One delivery channel covering a mix of exact topics and patterns.
    pub async fn subscribe_all(
        &self,
        topics: &[String],
        patterns: &[String],
    ) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER_SIZE);
        {
            let mut registry = self.inner.subs.lock().expect("subs lock poisoned");
            for topic in topics {
                registry
                    .topics
                    .entry(topic.clone())
                    .or_default()
                    .push(tx.clone());
            }
            for pattern in patterns {
                registry
                    .patterns
                    .entry(pattern.clone())
                    .or_default()
                    .push(tx.clone());
            }
        }
        if !topics.is_empty() {
            self.request(Command::Subscribe {
                topics: topics.to_vec(),
            })
            .await?;
        }
        if !patterns.is_empty() {
            self.request(Command::Psubscribe {
                patterns: patterns.to_vec(),
            })
            .await?;
        }
        Ok(Subscription { rx })
    }

    /// Drops every registration this connection holds on the broker.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        self.request(Command::Unsubscribe { topics: Vec::new() }).await?;
        self.request(Command::Punsubscribe {
            patterns: Vec::new(),
        })
        .await?;
        let mut registry = self.inner.subs.lock().expect("subs lock poisoned");
        registry.topics.clear();
        registry.patterns.clear();
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.request(Command::Get { key: key.to_string() }).await? {
            Reply::Str { value } => Ok(Some(value)),
            Reply::Nil => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.request(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.request(Command::Setex {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs: ttl.as_secs(),
        })
        .await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<bool> {
        self.int_request(Command::Del { key: key.to_string() })
            .await
            .map(|n| n > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.int_request(Command::Exists { key: key.to_string() })
            .await
            .map(|n| n > 0)
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self
            .request(Command::Keys {
                pattern: pattern.to_string(),
            })
            .await?
        {
            Reply::List { values } => Ok(values),
            other => Err(unexpected(other)),
        }
    }

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool> {
        self.int_request(Command::Zadd {
            key: key.to_string(),
            score,
            member: member.to_string(),
        })
        .await
        .map(|n| n > 0)
    }

    pub async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        match self
            .request(Command::Zrevrange {
                key: key.to_string(),
                start,
                stop,
            })
            .await?
        {
            Reply::List { values } => Ok(values),
            other => Err(unexpected(other)),
        }
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64> {
        self.int_request(Command::Zremrangebyscore {
            key: key.to_string(),
            min,
            max,
        })
        .await
    }

    pub async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<i64> {
        self.int_request(Command::Zremrangebyrank {
            key: key.to_string(),
            start,
            stop,
        })
        .await
    }

    pub async fn zcard(&self, key: &str) -> Result<i64> {
        self.int_request(Command::Zcard { key: key.to_string() })
            .await
    }

    async fn int_request(&self, command: Command) -> Result<i64> {
        match self.request(command).await? {
            Reply::Int { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn request(&self, command: Command) -> Result<Reply> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);
        let line = serde_json::to_string(&Request { id, command })?;

        if self.inner.out_tx.send(line).await.is_err() {
            self.inner.pending.remove(&id);
            return Err(Error::Bus("bus connection closed".into()));
        }

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(Error::Bus("bus connection lost mid-request".into()));
            }
            Err(_) => {
                self.inner.pending.remove(&id);
                return Err(Error::Bus("bus request timed out".into()));
            }
        };

        match reply {
            Reply::Error { message } => Err(Error::Bus(message)),
            other => Ok(other),
        }
    }
}

fn unexpected(reply: Reply) -> Error {
    Error::Bus(format!("unexpected reply: {reply:?}"))
}

async fn io_task(
    inner: Weak<ClientInner>,
    stream: TcpStream,
    mut out_rx: mpsc::Receiver<String>,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        tokio::select! {
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(line)) => {
                        let Some(strong) = inner.upgrade() else { return };
                        dispatch_line(&strong, &line);
                    }
                    Some(Err(e)) => {
                        warn!("bus read error: {:?}", e);
                        match reconnect(&inner).await {
                            Some(next) => framed = next,
                            None => return,
                        }
                    }
                    None => {
                        match reconnect(&inner).await {
                            Some(next) => framed = next,
                            None => return,
                        }
                    }
                }
            }
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(line) => {
                        if let Err(e) = framed.send(line).await {
                            warn!("bus write error: {:?}", e);
                            match reconnect(&inner).await {
                                Some(next) => framed = next,
                                None => return,
                            }
                        }
                    }
                    // Every client handle dropped.
                    None => return,
                }
            }
        }
    }
}

fn dispatch_line(inner: &Arc<ClientInner>, line: &str) {
    let frame = match serde_json::from_str::<ServerFrame>(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("undecodable bus frame ({}): {}", e, line);
            return;
        }
    };
    match frame {
        ServerFrame::Reply { id, reply } => {
            if let Some((_, tx)) = inner.pending.remove(&id) {
                let _ = tx.send(reply);
            }
        }
        ServerFrame::Message {
            topic,
            pattern,
            payload,
        } => {
            let mut registry = inner.subs.lock().expect("subs lock poisoned");
            let senders = match &pattern {
                Some(p) => registry.patterns.get_mut(p),
                None => registry.topics.get_mut(&topic),
            };
            if let Some(senders) = senders {
                senders.retain(|tx| {
                    match tx.try_send(Delivery {
                        topic: topic.clone(),
                        pattern: pattern.clone(),
                        payload: payload.clone(),
                    }) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("subscriber buffer full, dropping delivery on '{}'", topic);
                            true
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    }
                });
            }
        }
    }
}

/// Backoff-reconnect; fails pending requests, then re-registers every
/// subscription on the fresh connection. `None` once all client handles
/// are gone.
async fn reconnect(inner: &Weak<ClientInner>) -> Option<Framed<TcpStream, LinesCodec>> {
    {
        let strong = inner.upgrade()?;
        strong.pending.clear();
    }

    let mut backoff = RECONNECT_BACKOFF_MIN;
    loop {
        tokio::time::sleep(backoff).await;
        let strong = inner.upgrade()?;
        match TcpStream::connect(&strong.addr).await {
            Ok(stream) => {
                debug!("bus reconnected to {}", strong.addr);
                let mut framed =
                    Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
                let (topics, patterns) = {
                    let registry = strong.subs.lock().expect("subs lock poisoned");
                    (
                        registry.topics.keys().cloned().collect::<Vec<_>>(),
                        registry.patterns.keys().cloned().collect::<Vec<_>>(),
                    )
                };
                if !topics.is_empty() {
                    let id = strong.next_id.fetch_add(1, Ordering::Relaxed);
                    let line = serde_json::to_string(&Request {
                        id,
                        command: Command::Subscribe { topics },
                    })
                    .expect("subscribe frame serializes");
                    if framed.send(line).await.is_err() {
                        continue;
                    }
                }
                if !patterns.is_empty() {
                    let id = strong.next_id.fetch_add(1, Ordering::Relaxed);
                    let line = serde_json::to_string(&Request {
                        id,
                        command: Command::Psubscribe { patterns },
                    })
                    .expect("psubscribe frame serializes");
                    if framed.send(line).await.is_err() {
                        continue;
                    }
                }
                return Some(framed);
            }
            Err(e) => {
                warn!(
                    "bus reconnect to {} failed ({}), retrying in {:?}",
                    strong.addr, e, backoff
                );
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}
