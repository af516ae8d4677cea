//! src/envelope.rs
//!
//! The normalized event envelope carried by every JSON bus message, plus the
//! codec rules: producers must set `type`, `source`, `timestamp` and
//! `content`; loggers backfill what lenient decoding finds missing. Unknown
//! fields round-trip through the flattened `extra` map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

pub const SOURCE_TWITCH: &str = "twitch";
pub const SOURCE_SYSTEM: &str = "system";

/// Converts a handle to its canonical identity form: lowercase, no `@`.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Chat,
    Command,
    System,
    Helper,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Command => "command",
            EventKind::System => "system",
            EventKind::Helper => "helper",
        }
    }
}

/// The author of a chat or command event. `name` is the identity key and is
/// always `lower(display_name without '@')`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub mention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotes: Vec<String>,
    #[serde(default)]
    pub moderator: bool,
    #[serde(default)]
    pub subscriber: bool,
    #[serde(default)]
    pub vip: bool,
    #[serde(default)]
    pub broadcaster: bool,
}

impl Author {
    pub fn new(display_name: &str) -> Self {
        let display_name = display_name.trim_start_matches('@').to_string();
        Self {
            name: normalize_username(&display_name),
            mention: format!("@{display_name}"),
            display_name,
            ..Default::default()
        }
    }

    pub fn broadcaster(display_name: &str) -> Self {
        Self {
            broadcaster: true,
            ..Self::new(display_name)
        }
    }
}

/// Every JSON message on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub event_data: Map<String, Value>,
    /// Legacy producers put the command name at the top level; the first
    /// consumer that touches the envelope moves it into `event_data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn chat(author: Author, content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Chat,
            source: SOURCE_TWITCH.to_string(),
            timestamp: Utc::now(),
            content: content.into(),
            metadata: Map::new(),
            author: Some(author),
            event_data: Map::new(),
            command: None,
            extra: Map::new(),
        }
    }

    pub fn command(author: Author, name: &str, content: impl Into<String>) -> Self {
        let mut event_data = Map::new();
        event_data.insert("command".to_string(), json!(name));
        Self {
            kind: EventKind::Command,
            source: SOURCE_TWITCH.to_string(),
            timestamp: Utc::now(),
            content: content.into(),
            metadata: Map::new(),
            author: Some(author),
            event_data,
            command: None,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::System,
            source: SOURCE_SYSTEM.to_string(),
            timestamp: Utc::now(),
            content: content.into(),
            metadata: Map::new(),
            author: None,
            event_data: Map::new(),
            command: None,
            extra: Map::new(),
        }
    }

    /// Moves a legacy top-level `command` into `event_data`.
    pub fn normalize(&mut self) {
        if let Some(name) = self.command.take() {
            self.event_data
                .entry("command".to_string())
                .or_insert_with(|| json!(name));
        }
    }

    /// The command name, wherever the producer put it.
    pub fn command_name(&self) -> Option<&str> {
        self.event_data
            .get("command")
            .and_then(Value::as_str)
            .or(self.command.as_deref())
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Decoding used by logger workers: backfills `type` (derived from the
    /// topic), `source` and `timestamp` when a producer omitted them, and
    /// replaces an unrecognized `type` with `system`. A payload that is not
    /// a JSON object is still a hard parse error.
    pub fn decode_lenient(topic: &str, payload: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(payload)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| Error::Parse(format!("envelope on '{topic}' is not an object")))?;

        let kind_valid = obj
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| matches!(t, "chat" | "command" | "system" | "helper"));
        if !kind_valid {
            obj.insert("type".to_string(), json!(default_kind(topic)));
        }
        if !obj.get("source").is_some_and(Value::is_string) {
            let source = if topic.starts_with("chat.") || topic.starts_with("command.") {
                SOURCE_TWITCH
            } else {
                SOURCE_SYSTEM
            };
            obj.insert("source".to_string(), json!(source));
        }
        if !obj.get("timestamp").is_some_and(Value::is_string) {
            obj.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let mut envelope: Envelope = serde_json::from_value(value)?;
        envelope.normalize();
        Ok(envelope)
    }
}

fn default_kind(topic: &str) -> &'static str {
    if topic.starts_with("chat.") {
        "chat"
    } else if topic.starts_with("command.") {
        "command"
    } else {
        "system"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_new_normalizes_name() {
        let author = Author::new("@MixedCase");
        assert_eq!(author.name, "mixedcase");
        assert_eq!(author.display_name, "MixedCase");
        assert_eq!(author.mention, "@MixedCase");
        assert!(!author.broadcaster);
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{"type":"chat","source":"twitch","timestamp":"2026-01-02T03:04:05Z","content":"hi","shiny":true}"#;
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(envelope.extra.get("shiny"), Some(&json!(true)));
        let encoded = envelope.encode().unwrap();
        let back = Envelope::decode(&encoded).unwrap();
        assert_eq!(back.extra.get("shiny"), Some(&json!(true)));
    }

    #[test]
    fn legacy_command_moves_into_event_data() {
        let raw = r#"{"type":"command","source":"twitch","timestamp":"2026-01-02T03:04:05Z","content":"50","command":"gamble"}"#;
        let mut envelope = Envelope::decode(raw).unwrap();
        envelope.normalize();
        assert!(envelope.command.is_none());
        assert_eq!(envelope.command_name(), Some("gamble"));
    }

    #[test]
    fn lenient_decode_backfills_missing_fields() {
        let envelope = Envelope::decode_lenient("system.log.gamble", r#"{"content":"ready"}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::System);
        assert_eq!(envelope.source, SOURCE_SYSTEM);
        assert_eq!(envelope.content, "ready");
    }

    #[test]
    fn lenient_decode_replaces_unknown_kind() {
        let envelope =
            Envelope::decode_lenient("admin.brb", r#"{"type":"admin","content":"brb"}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::System);
    }

    #[test]
    fn lenient_decode_rejects_non_objects() {
        assert!(Envelope::decode_lenient("chat.received", r#""just text""#).is_err());
        assert!(Envelope::decode_lenient("chat.received", "not json").is_err());
    }

    #[test]
    fn command_builder_sets_event_data() {
        let envelope = Envelope::command(Author::new("alice"), "gamble", "50");
        assert_eq!(envelope.command_name(), Some("gamble"));
        assert_eq!(envelope.kind, EventKind::Command);
    }
}
