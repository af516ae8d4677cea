//! src/keys.rs
//!
//! Builders for the persisted key layout. All user aggregates live under
//! `user:<lower-name>`; rolling history sets under `messages:*`; external
//! API caches under `cache:*` with a 48 h TTL.

use crate::envelope::normalize_username;

pub const MESSAGES_ALL: &str = "messages:all";
pub const MESSAGES_CHAT: &str = "messages:chat";
pub const MESSAGES_COMMAND: &str = "messages:command";
pub const MESSAGES_SYSTEM: &str = "messages:system";
pub const MESSAGES_ADMIN: &str = "messages:admin";

pub const CACHE_NEED_REFRESH_EMOTES: &str = "cache:need_refresh:emotes";
pub const CACHE_LAST_CLEARED: &str = "cache:last_cleared";

pub const DAILY_INTEREST_RATE: &str = "daily_interest_rate";

/// Default TTL for `cache:*` blobs.
pub const CACHE_TTL_SECS: u64 = 48 * 3600;

pub fn user(name: &str) -> String {
    format!("user:{}", normalize_username(name))
}

/// Per-command history set.
pub fn command_history(name: &str) -> String {
    format!("commands:{name}")
}

/// Per-component system history set.
pub fn system_history(component: &str) -> String {
    format!("system:{component}")
}

/// One field of an external-API cache blob (`image`, `mime` or `data`).
pub fn cache_blob(domain: &str, id: &str, field: &str) -> String {
    format!("cache:{domain}:{id}:{field}")
}

/// Secrets namespace read at startup.
pub fn env(name: &str) -> String {
    format!("env:{name}")
}

/// Legacy per-domain keys folded into `user:<name>` on first touch.
pub fn legacy_dustbunnies(name: &str) -> String {
    format!("dustbunnies:{}", normalize_username(name))
}

pub fn legacy_banking(name: &str) -> String {
    format!("banking:{}", normalize_username(name))
}

pub fn legacy_global(name: &str) -> String {
    format!("global:{}", normalize_username(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_is_normalized() {
        assert_eq!(user("@Alice"), "user:alice");
        assert_eq!(user("bob"), "user:bob");
    }

    #[test]
    fn cache_blob_layout() {
        assert_eq!(cache_blob("emotes", "42", "image"), "cache:emotes:42:image");
    }
}
