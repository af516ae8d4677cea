//! src/history.rs
//!
//! Bounded, time-ordered history of envelopes per message class. Members
//! carry a hidden `_score` field (wall-clock seconds at store time) so two
//! otherwise identical messages stay distinct set members, same as the score
//! used for ordering. After every append the class set is trimmed back to
//! its bound by rank, oldest out.

use chrono::Utc;
use serde_json::json;

use dustbot_bus::BusClient;
use dustbot_common::error::{Error, Result};
use dustbot_common::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryClass {
    Chat,
    Command,
    System,
    Admin,
}

impl HistoryClass {
    pub fn key(self) -> &'static str {
        match self {
            HistoryClass::Chat => keys::MESSAGES_CHAT,
            HistoryClass::Command => keys::MESSAGES_COMMAND,
            HistoryClass::System => keys::MESSAGES_SYSTEM,
            HistoryClass::Admin => keys::MESSAGES_ADMIN,
        }
    }

    /// Per-name set for this class, e.g. `commands:gamble`.
    fn named_key(self, name: &str) -> String {
        match self {
            HistoryClass::Command => keys::command_history(name),
            _ => keys::system_history(name),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryBounds {
    pub all: i64,
    pub chat: i64,
    pub command: i64,
    pub system: i64,
    pub admin: i64,
}

impl Default for HistoryBounds {
    fn default() -> Self {
        Self {
            all: 10_000,
            chat: 10_000,
            command: 5_000,
            system: 5_000,
            admin: 5_000,
        }
    }
}

impl HistoryBounds {
    fn for_class(&self, class: HistoryClass) -> i64 {
        match class {
            HistoryClass::Chat => self.chat,
            HistoryClass::Command => self.command,
            HistoryClass::System => self.system,
            HistoryClass::Admin => self.admin,
        }
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    bus: BusClient,
    bounds: HistoryBounds,
}

impl HistoryStore {
    pub fn new(bus: BusClient) -> Self {
        Self::with_bounds(bus, HistoryBounds::default())
    }

    pub fn with_bounds(bus: BusClient, bounds: HistoryBounds) -> Self {
        Self { bus, bounds }
    }

    /// Stores one envelope (as raw JSON) into `messages:all`, the class set
    /// and, when given, the per-name set; trims each to its bound. Returns
    /// the score used.
    pub async fn append(
        &self,
        class: HistoryClass,
        name: Option<&str>,
        payload: &str,
    ) -> Result<f64> {
        let mut value: serde_json::Value = serde_json::from_str(payload)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| Error::Parse("history entry is not an object".to_string()))?;

        let score = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        obj.insert("_score".to_string(), json!(score));
        let member = serde_json::to_string(&value)?;

        self.bus.zadd(keys::MESSAGES_ALL, score, &member).await?;
        self.trim(keys::MESSAGES_ALL, self.bounds.all).await?;

        self.bus.zadd(class.key(), score, &member).await?;
        self.trim(class.key(), self.bounds.for_class(class)).await?;

        if let Some(name) = name {
            let named = class.named_key(name);
            self.bus.zadd(&named, score, &member).await?;
            self.trim(&named, self.bounds.for_class(class)).await?;
        }

        Ok(score)
    }

    /// The most recent `count` members, newest first.
    pub async fn recent(&self, class: HistoryClass, count: i64) -> Result<Vec<String>> {
        self.bus.zrevrange(class.key(), 0, count - 1).await
    }

    async fn trim(&self, key: &str, bound: i64) -> Result<()> {
        let n = self.bus.zcard(key).await?;
        if n > bound {
            self.bus.zremrangebyrank(key, 0, n - bound - 1).await?;
        }
        Ok(())
    }
}
