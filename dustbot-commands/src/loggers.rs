//! src/loggers.rs
//!
//! The three logger workers: they persist envelopes into the rolling
//! history sets and keep the per-user `log` counters current. Storage
//! re-encodes the lenient-decoded envelope, so backfilled `type`,
//! `source` and `timestamp` land in the history too.

use async_trait::async_trait;
use tracing::debug;

use dustbot_common::envelope::Envelope;
use dustbot_common::error::Result;
use dustbot_common::topics;
use dustbot_core::history::{HistoryBounds, HistoryClass, HistoryStore};
use dustbot_core::worker::{Worker, WorkerContext};

pub struct ChatLogger {
    bounds: HistoryBounds,
}

impl ChatLogger {
    pub fn new() -> Self {
        Self {
            bounds: HistoryBounds::default(),
        }
    }

    /// Reduced bounds, for tests.
    pub fn with_bounds(bounds: HistoryBounds) -> Self {
        Self { bounds }
    }
}

impl Default for ChatLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for ChatLogger {
    fn name(&self) -> &'static str {
        "chat_logger"
    }

    fn topics(&self) -> Vec<String> {
        vec![topics::CHAT_RECEIVED.to_string()]
    }

    async fn handle(&mut self, ctx: &WorkerContext, _topic: &str, envelope: Envelope) -> Result<()> {
        let history = HistoryStore::with_bounds(ctx.bus.clone(), self.bounds);
        history
            .append(HistoryClass::Chat, None, &envelope.encode()?)
            .await?;
        debug!("stored chat message: {}", envelope.content);

        if let Some(author) = &envelope.author {
            let content = envelope.content.clone();
            let timestamp = envelope.timestamp.to_rfc3339();
            ctx.users
                .update(&author.name, &author.display_name, |user| {
                    user.log.chat += 1;
                    user.log.last_message = content;
                    user.log.last_timestamp = timestamp;
                    user.dustbunnies_mut().message_count += 1;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }
}

pub struct CommandLogger {
    bounds: HistoryBounds,
}

impl CommandLogger {
    pub fn new() -> Self {
        Self {
            bounds: HistoryBounds::default(),
        }
    }

    pub fn with_bounds(bounds: HistoryBounds) -> Self {
        Self { bounds }
    }
}

impl Default for CommandLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for CommandLogger {
    fn name(&self) -> &'static str {
        "command_logger"
    }

    fn topics(&self) -> Vec<String> {
        Vec::new()
    }

    fn patterns(&self) -> Vec<String> {
        vec![topics::COMMAND_PATTERN.to_string()]
    }

    async fn handle(&mut self, ctx: &WorkerContext, topic: &str, mut envelope: Envelope) -> Result<()> {
        let command_name = topics::last_segment(topic).to_string();
        envelope
            .event_data
            .entry("command".to_string())
            .or_insert_with(|| serde_json::json!(command_name.clone()));

        let history = HistoryStore::with_bounds(ctx.bus.clone(), self.bounds);
        history
            .append(HistoryClass::Command, Some(command_name.as_str()), &envelope.encode()?)
            .await?;
        debug!("stored command !{}: {}", command_name, envelope.content);

        if let Some(author) = &envelope.author {
            let timestamp = envelope.timestamp.to_rfc3339();
            ctx.users
                .update(&author.name, &author.display_name, |user| {
                    user.log.command += 1;
                    user.log.last_command = command_name;
                    user.log.last_timestamp = timestamp;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }
}

pub struct SystemLogger {
    bounds: HistoryBounds,
}

impl SystemLogger {
    pub fn new() -> Self {
        Self {
            bounds: HistoryBounds::default(),
        }
    }

    pub fn with_bounds(bounds: HistoryBounds) -> Self {
        Self { bounds }
    }
}

impl Default for SystemLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for SystemLogger {
    fn name(&self) -> &'static str {
        "system_logger"
    }

    fn topics(&self) -> Vec<String> {
        Vec::new()
    }

    fn patterns(&self) -> Vec<String> {
        vec![
            topics::SYSTEM_PATTERN.to_string(),
            topics::SYSTEM_LOG_PATTERN.to_string(),
            "system.user.*".to_string(),
            topics::ADMIN_PATTERN.to_string(),
        ]
    }

    async fn handle(&mut self, ctx: &WorkerContext, topic: &str, envelope: Envelope) -> Result<()> {
        let class = if topic.starts_with("admin.") {
            HistoryClass::Admin
        } else {
            HistoryClass::System
        };
        let component = topics::last_segment(topic).to_string();

        let history = HistoryStore::with_bounds(ctx.bus.clone(), self.bounds);
        history
            .append(class, Some(component.as_str()), &envelope.encode()?)
            .await?;
        debug!("stored {} record on '{}'", component, topic);

        if let Some(author) = &envelope.author {
            let content = envelope.content.clone();
            let timestamp = envelope.timestamp.to_rfc3339();
            ctx.users
                .update(&author.name, &author.display_name, |user| {
                    match class {
                        HistoryClass::Admin => {
                            user.log.admin += 1;
                            user.log.last_admin_command = content;
                        }
                        _ => {
                            user.log.system += 1;
                            user.log.last_system_command = content;
                        }
                    }
                    user.log.last_timestamp = timestamp;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }
}
