//! src/protocol.rs
//!
//! Wire protocol between the broker and its clients: one JSON object per
//! line in each direction. Requests carry a client-chosen id echoed back in
//! the reply; pub/sub deliveries arrive as unsolicited `message` frames on
//! the same connection, queued behind any pending replies so publish order
//! per topic is preserved per subscriber.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Publish { topic: String, payload: String },
    Subscribe { topics: Vec<String> },
    Psubscribe { patterns: Vec<String> },
    /// An empty list unsubscribes from everything.
    Unsubscribe { topics: Vec<String> },
    Punsubscribe { patterns: Vec<String> },

    Get { key: String },
    Set { key: String, value: String },
    Setex { key: String, value: String, ttl_secs: u64 },
    Del { key: String },
    Exists { key: String },
    /// Administrative only.
    Keys { pattern: String },

    Zadd { key: String, score: f64, member: String },
    Zrevrange { key: String, start: i64, stop: i64 },
    Zremrangebyscore { key: String, min: f64, max: f64 },
    Zremrangebyrank { key: String, start: i64, stop: i64 },
    Zcard { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Nil,
    Str { value: String },
    Int { value: i64 },
    List { values: Vec<String> },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply {
        id: u64,
        reply: Reply,
    },
    Message {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        payload: String,
    },
}

/// Wildcard matching for `PSUBSCRIBE`: a trailing `*` matches exactly one
/// additional dot-separated segment, so `command.*` delivers
/// `command.gamble` but not `command.a.b`.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|tail| !tail.is_empty() && !tail.contains('.')),
        None => {
            if pattern == "*" {
                !topic.is_empty() && !topic.contains('.')
            } else {
                pattern == topic
            }
        }
    }
}
