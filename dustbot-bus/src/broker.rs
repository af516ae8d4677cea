//! src/broker.rs
//!
//! The bus broker: one TCP listener, one connection task per client, all
//! state behind a single mutex. Replies and pub/sub deliveries for a client
//! share its outbound queue, which keeps publish order per topic intact for
//! every subscriber. Fan-out is at-most-once: a subscriber whose queue is
//! full loses the message instead of stalling the broker.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

use tokio_util::codec::{Framed, LinesCodec};

use crate::protocol::{Command, Reply, Request, ServerFrame, topic_matches};
use crate::store::MemoryStore;

/// Frames queued per connection before the broker starts dropping
/// deliveries for it.
const PEER_BUFFER_SIZE: usize = 10_000;

const MAX_LINE_LENGTH: usize = 512 * 1024;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Peer {
    tx: mpsc::Sender<ServerFrame>,
    topics: HashSet<String>,
    patterns: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    store: MemoryStore,
    peers: HashMap<u64, Peer>,
}

pub struct Broker {
    listener: TcpListener,
    inner: Arc<Mutex<Inner>>,
    next_conn_id: AtomicU64,
}

impl Broker {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            inner: Arc::new(Mutex::new(Inner::default())),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the task is dropped.
    pub async fn run(self) {
        let sweep_state = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                sweep_state.lock().await.store.purge_expired();
            }
        });

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                    debug!("bus connection {} accepted from {}", conn_id, addr);
                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        handle_connection(inner, stream, conn_id).await;
                    });
                }
                Err(e) => {
                    error!("accept failed: {:?}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(inner: Arc<Mutex<Inner>>, stream: TcpStream, conn_id: u64) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut lines) = framed.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(PEER_BUFFER_SIZE);

    inner.lock().await.peers.insert(
        conn_id,
        Peer {
            tx,
            topics: HashSet::new(),
            patterns: HashSet::new(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to encode frame: {:?}", e);
                    continue;
                }
            };
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                warn!("bus connection {}: read error: {:?}", conn_id, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => apply_request(&inner, conn_id, request).await,
            Err(e) => {
                warn!("bus connection {}: bad request ({}): {}", conn_id, e, line);
            }
        }
    }

    inner.lock().await.peers.remove(&conn_id);
    writer.abort();
    debug!("bus connection {} closed", conn_id);
}

async fn apply_request(inner: &Arc<Mutex<Inner>>, conn_id: u64, request: Request) {
    let mut guard = inner.lock().await;
    let reply = match request.command {
        Command::Publish { topic, payload } => {
            let mut receivers = 0i64;
            for (id, peer) in guard.peers.iter() {
                if peer.topics.contains(&topic) {
                    deliver(*id, peer, &topic, None, &payload);
                    receivers += 1;
                }
                for pattern in &peer.patterns {
                    if topic_matches(pattern, &topic) {
                        deliver(*id, peer, &topic, Some(pattern.clone()), &payload);
                        receivers += 1;
                    }
                }
            }
            Reply::Int { value: receivers }
        }
        Command::Subscribe { topics } => {
            if let Some(peer) = guard.peers.get_mut(&conn_id) {
                peer.topics.extend(topics);
            }
            Reply::Ok
        }
        Command::Psubscribe { patterns } => {
            if let Some(peer) = guard.peers.get_mut(&conn_id) {
                peer.patterns.extend(patterns);
            }
            Reply::Ok
        }
        Command::Unsubscribe { topics } => {
            if let Some(peer) = guard.peers.get_mut(&conn_id) {
                if topics.is_empty() {
                    peer.topics.clear();
                } else {
                    for topic in &topics {
                        peer.topics.remove(topic);
                    }
                }
            }
            Reply::Ok
        }
        Command::Punsubscribe { patterns } => {
            if let Some(peer) = guard.peers.get_mut(&conn_id) {
                if patterns.is_empty() {
                    peer.patterns.clear();
                } else {
                    for pattern in &patterns {
                        peer.patterns.remove(pattern);
                    }
                }
            }
            Reply::Ok
        }
        Command::Get { key } => match guard.store.get(&key) {
            Some(value) => Reply::Str { value },
            None => Reply::Nil,
        },
        Command::Set { key, value } => {
            guard.store.set(&key, value);
            Reply::Ok
        }
        Command::Setex {
            key,
            value,
            ttl_secs,
        } => {
            guard
                .store
                .setex(&key, value, Duration::from_secs(ttl_secs));
            Reply::Ok
        }
        Command::Del { key } => Reply::Int {
            value: guard.store.del(&key) as i64,
        },
        Command::Exists { key } => Reply::Int {
            value: guard.store.exists(&key) as i64,
        },
        Command::Keys { pattern } => Reply::List {
            values: guard.store.keys(&pattern),
        },
        Command::Zadd { key, score, member } => Reply::Int {
            value: guard.store.zadd(&key, score, member) as i64,
        },
        Command::Zrevrange { key, start, stop } => Reply::List {
            values: guard.store.zrevrange(&key, start, stop),
        },
        Command::Zremrangebyscore { key, min, max } => Reply::Int {
            value: guard.store.zremrangebyscore(&key, min, max) as i64,
        },
        Command::Zremrangebyrank { key, start, stop } => Reply::Int {
            value: guard.store.zremrangebyrank(&key, start, stop) as i64,
        },
        Command::Zcard { key } => Reply::Int {
            value: guard.store.zcard(&key) as i64,
        },
    };

    if let Some(peer) = guard.peers.get(&conn_id) {
        let frame = ServerFrame::Reply {
            id: request.id,
            reply,
        };
        if peer.tx.try_send(frame).is_err() {
            // The client's queue is saturated; it will observe the missing
            // reply as a request timeout.
            warn!("bus connection {}: reply dropped, queue full", conn_id);
        }
    }
}

fn deliver(conn_id: u64, peer: &Peer, topic: &str, pattern: Option<String>, payload: &str) {
    let frame = ServerFrame::Message {
        topic: topic.to_string(),
        pattern,
        payload: payload.to_string(),
    };
    match peer.tx.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "bus connection {}: delivery on '{}' dropped, subscriber too slow",
                conn_id, topic
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // Peer is going away; the connection task cleans it up.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let broker = Broker::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn two_brokers_coexist_on_distinct_ports() {
        let a = Broker::bind("127.0.0.1:0").await.unwrap();
        let b = Broker::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port()
        );
    }
}
