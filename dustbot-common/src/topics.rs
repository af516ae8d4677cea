//! src/topics.rs
//!
//! The normative topic namespace for the bus. Every component publishes and
//! subscribes through these names; wildcards match exactly one suffix
//! segment via `*`.

/// Every non-command chat message, published by the ingest adapter.
pub const CHAT_RECEIVED: &str = "chat.received";

/// A plain string sent to the primary chat as the bot account.
pub const CHAT_SEND: &str = "chat.send";

/// Same as [`CHAT_SEND`] but routed through the broadcaster account.
pub const CHAT_MAIN_SEND: &str = "chat.main.send";

/// Text for a styled announcement API call (raw string payload).
pub const CHAT_ANNOUNCEMENT: &str = "chat.announcement";

/// Broadcaster id for a shoutout API call (raw string payload).
pub const CHAT_SHOUTOUT: &str = "chat.shoutout";

/// Stream state toggles.
pub const SYSTEM_USER_LIVE: &str = "system.user.live";
pub const SYSTEM_USER_OFFLINE: &str = "system.user.offline";

/// Operator commands addressed to the supervisor.
pub const COMMAND_SYSTEM: &str = "command.system";

/// Patterns used by the logger workers.
pub const COMMAND_PATTERN: &str = "command.*";
pub const SYSTEM_PATTERN: &str = "system.*";
pub const SYSTEM_LOG_PATTERN: &str = "system.log.*";
pub const ADMIN_PATTERN: &str = "admin.*";

/// Topic for a parsed chat command (`name` is the token after `!`).
pub fn command(name: &str) -> String {
    format!("command.{name}")
}

/// Structured log records for one component.
pub fn system_log(component: &str) -> String {
    format!("system.log.{component}")
}

/// Generic system notification.
pub fn system(name: &str) -> String {
    format!("system.{name}")
}

/// Worker-to-worker requests.
pub fn internal_command(name: &str) -> String {
    format!("internal.command.{name}")
}

/// Topics whose payload is a raw string rather than a JSON envelope.
pub fn is_raw_payload(topic: &str) -> bool {
    matches!(
        topic,
        CHAT_SEND | CHAT_MAIN_SEND | CHAT_ANNOUNCEMENT | CHAT_SHOUTOUT
    )
}

/// The last dot-separated segment of a topic, e.g. the command name of
/// `command.gamble` or the component of `system.log.supervisor`.
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('.').next().unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_expected_names() {
        assert_eq!(command("gamble"), "command.gamble");
        assert_eq!(system_log("supervisor"), "system.log.supervisor");
        assert_eq!(internal_command("refresh"), "internal.command.refresh");
    }

    #[test]
    fn raw_payload_topics() {
        assert!(is_raw_payload(CHAT_SEND));
        assert!(is_raw_payload(CHAT_ANNOUNCEMENT));
        assert!(!is_raw_payload(CHAT_RECEIVED));
        assert!(!is_raw_payload("command.gamble"));
    }

    #[test]
    fn last_segment_of_topic() {
        assert_eq!(last_segment("system.log.supervisor"), "supervisor");
        assert_eq!(last_segment("command.gamble"), "gamble");
        assert_eq!(last_segment("plain"), "plain");
    }
}
