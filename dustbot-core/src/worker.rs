//! src/worker.rs
//!
//! The command-worker harness: one bus connection, one subscription
//! registration, one envelope at a time. A handler error is logged and
//! answered with a generic chat reply; it never takes the worker down.
//! SIGINT/SIGTERM stop consumption, unsubscribe, and exit cleanly so the
//! supervisor's 3 s grace window is enough.

use async_trait::async_trait;
use tracing::{error, info, warn};

use dustbot_bus::{BusClient, Delivery};
use dustbot_common::envelope::Envelope;
use dustbot_common::error::Result;
use dustbot_common::topics;

use crate::caller;
use crate::logging::{BusLogLevel, BusLogger, Caller};
use crate::secrets::SecretStore;
use crate::user_store::UserStore;

/// Everything a handler needs for side effects.
pub struct WorkerContext {
    pub bus: BusClient,
    pub users: UserStore,
    pub secrets: SecretStore,
    logger: BusLogger,
}

impl WorkerContext {
    /// Chat reply as the bot account (raw string payload).
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.bus.publish(topics::CHAT_SEND, text).await
    }

    /// Chat reply routed through the broadcaster account.
    pub async fn reply_main(&self, text: &str) -> Result<()> {
        self.bus.publish(topics::CHAT_MAIN_SEND, text).await
    }

    pub async fn log(&self, level: BusLogLevel, content: impl Into<String>, caller: Caller) {
        self.logger.log(level, content, caller).await;
    }

    pub async fn log_with(
        &self,
        level: BusLogLevel,
        content: impl Into<String>,
        caller: Caller,
        extra: serde_json::Value,
    ) {
        self.logger.log_with(level, content, caller, Some(extra)).await;
    }
}

#[async_trait]
pub trait Worker: Send {
    /// Worker name; also the log component and the supervisor-facing name.
    fn name(&self) -> &'static str;

    /// Exact subscription topics, usually `command.<alias>` per alias.
    fn topics(&self) -> Vec<String>;

    /// Pattern subscriptions (logger workers).
    fn patterns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Bus log records below this level are suppressed.
    fn log_level(&self) -> BusLogLevel {
        BusLogLevel::Info
    }

    /// Startup hook; a missing required secret should error out here.
    async fn started(&mut self, _ctx: &WorkerContext) -> Result<()> {
        Ok(())
    }

    async fn handle(&mut self, ctx: &WorkerContext, topic: &str, envelope: Envelope)
    -> Result<()>;
}

/// Connects, subscribes and drives the worker until a signal arrives or the
/// bus goes away for good.
pub async fn run<W: Worker>(mut worker: W, bus_addr: &str) -> Result<()> {
    let bus = BusClient::connect(bus_addr).await?;
    let ctx = WorkerContext {
        users: UserStore::new(bus.clone()),
        secrets: SecretStore::new(bus.clone()),
        logger: BusLogger::new(bus.clone(), worker.name(), worker.log_level()),
        bus,
    };

    if let Err(e) = worker.started(&ctx).await {
        error!("{} failed to start: {:?}", worker.name(), e);
        ctx.log(
            BusLogLevel::Error,
            format!("{} failed to start: {e}", worker.name()),
            caller!(),
        )
        .await;
        return Err(e);
    }

    let topics = worker.topics();
    let patterns = worker.patterns();
    let mut sub = ctx.bus.subscribe_all(&topics, &patterns).await?;

    ctx.log(
        BusLogLevel::Startup,
        format!("{} worker is ready", worker.name()),
        caller!(),
    )
    .await;
    info!(
        "{} subscribed to {:?} {:?}",
        worker.name(),
        topics,
        patterns
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                delivery = sub.recv() => {
                    match delivery {
                        Some(delivery) => process(&mut worker, &ctx, delivery).await,
                        None => {
                            error!("{}: bus subscription closed", worker.name());
                            break;
                        }
                    }
                }
                _ = sigint.recv() => {
                    info!("{}: SIGINT received, shutting down", worker.name());
                    break;
                }
                _ = sigterm.recv() => {
                    info!("{}: SIGTERM received, shutting down", worker.name());
                    break;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        loop {
            tokio::select! {
                delivery = sub.recv() => {
                    match delivery {
                        Some(delivery) => process(&mut worker, &ctx, delivery).await,
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    if let Err(e) = ctx.bus.unsubscribe_all().await {
        warn!("{}: unsubscribe on exit failed: {:?}", worker.name(), e);
    }
    Ok(())
}

/// Decodes and dispatches one delivery. A malformed envelope is logged and
/// dropped; a handler error is logged, answered with a generic reply, and
/// the worker keeps running.
pub async fn process<W: Worker>(worker: &mut W, ctx: &WorkerContext, delivery: Delivery) {
    let envelope = match Envelope::decode_lenient(&delivery.topic, &delivery.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(
                "{}: malformed envelope on '{}': {:?}",
                worker.name(),
                delivery.topic,
                e
            );
            ctx.log(
                BusLogLevel::Error,
                format!("malformed envelope on {}: {e}", delivery.topic),
                caller!(),
            )
            .await;
            return;
        }
    };

    if let Err(e) = worker.handle(ctx, &delivery.topic, envelope).await {
        error!("{}: handler error: {:?}", worker.name(), e);
        ctx.log(
            BusLogLevel::Error,
            format!("error in {} handler: {e}", worker.name()),
            caller!(),
        )
        .await;
        if let Err(reply_err) = ctx
            .reply(&format!("error processing {}", worker.name()))
            .await
        {
            warn!("{}: failed to send error reply: {:?}", worker.name(), reply_err);
        }
    }
}

/// Builds a context directly from a client; used by integration tests that
/// drive `handle` without the subscription loop.
pub fn context_for(bus: BusClient, component: &str, min_level: BusLogLevel) -> WorkerContext {
    WorkerContext {
        users: UserStore::new(bus.clone()),
        secrets: SecretStore::new(bus.clone()),
        logger: BusLogger::new(bus.clone(), component, min_level),
        bus,
    }
}
