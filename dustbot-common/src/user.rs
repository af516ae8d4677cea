//! src/user.rs
//!
//! The per-user aggregate document stored under `user:<name>`. Sub-objects
//! are independent and additive: a missing sub-object reads as zero/empty
//! and is created on first touch through the `*_mut` accessors. Currency
//! never goes negative; debits fail with `Error::InsufficientFunds` and
//! leave the document untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::normalize_username;
use crate::error::{Error, Result};

/// Counters maintained by the logger workers, plus the `last_*` fields they
/// overwrite per stored envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogCounters {
    #[serde(default)]
    pub chat: u64,
    #[serde(default)]
    pub command: u64,
    #[serde(default)]
    pub admin: u64,
    #[serde(default)]
    pub system: u64,
    #[serde(default)]
    pub lurk: u64,
    #[serde(default)]
    pub unlurk: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_admin_command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_system_command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dustbunnies {
    #[serde(default)]
    pub collected_dustbunnies: i64,
    #[serde(default)]
    pub message_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Banking {
    /// An old keyspace called this `points_invested`.
    #[serde(default, alias = "points_invested")]
    pub bunnies_invested: i64,
    #[serde(default)]
    pub total_bunnies_collected: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_investment: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_interest_collected: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gambling {
    #[serde(default)]
    pub input: i64,
    #[serde(default)]
    pub results: i64,
    #[serde(default)]
    pub wins: i64,
    #[serde(default)]
    pub losses: i64,
    #[serde(default)]
    pub slots_played: i64,
    #[serde(default)]
    pub slots_won: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fighting {
    #[serde(default)]
    pub fights_won: u64,
    #[serde(default)]
    pub fights_lost: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fight_requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub log: LogCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dustbunnies: Option<Dustbunnies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banking: Option<Banking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gambling: Option<Gambling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fighting: Option<Fighting>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: normalize_username(name),
            display_name: display_name.trim_start_matches('@').to_string(),
            log: LogCounters::default(),
            dustbunnies: None,
            banking: None,
            gambling: None,
            fighting: None,
            extra: Map::new(),
        }
    }

    pub fn dustbunnies_mut(&mut self) -> &mut Dustbunnies {
        self.dustbunnies.get_or_insert_with(Dustbunnies::default)
    }

    pub fn banking_mut(&mut self) -> &mut Banking {
        self.banking.get_or_insert_with(Banking::default)
    }

    pub fn gambling_mut(&mut self) -> &mut Gambling {
        self.gambling.get_or_insert_with(Gambling::default)
    }

    pub fn fighting_mut(&mut self) -> &mut Fighting {
        self.fighting.get_or_insert_with(Fighting::default)
    }

    /// Dustbunnies currently held.
    pub fn balance(&self) -> i64 {
        self.dustbunnies
            .as_ref()
            .map(|d| d.collected_dustbunnies)
            .unwrap_or(0)
    }

    pub fn credit(&mut self, amount: i64) {
        self.dustbunnies_mut().collected_dustbunnies += amount;
    }

    /// Checked debit; fails without touching the document.
    pub fn debit(&mut self, amount: i64) -> Result<()> {
        let held = self.balance();
        if amount > held {
            return Err(Error::InsufficientFunds {
                requested: amount,
                held,
            });
        }
        self.dustbunnies_mut().collected_dustbunnies -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sub_objects_read_as_empty() {
        let raw = r#"{"name":"alice","display_name":"Alice"}"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(user.balance(), 0);
        assert!(user.gambling.is_none());
        assert_eq!(user.log.chat, 0);
    }

    #[test]
    fn first_touch_creates_sub_object() {
        let mut user = UserRecord::new("alice", "Alice");
        assert!(user.fighting.is_none());
        user.fighting_mut().fights_won += 1;
        assert_eq!(user.fighting.as_ref().unwrap().fights_won, 1);
    }

    #[test]
    fn debit_never_goes_negative() {
        let mut user = UserRecord::new("alice", "Alice");
        user.credit(30);
        let err = user.debit(50).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds {
                requested: 50,
                held: 30
            }
        ));
        assert_eq!(user.balance(), 30);
        user.debit(30).unwrap();
        assert_eq!(user.balance(), 0);
    }

    #[test]
    fn legacy_points_invested_alias() {
        let raw = r#"{"points_invested":120,"total_bunnies_collected":7}"#;
        let banking: Banking = serde_json::from_str(raw).unwrap();
        assert_eq!(banking.bunnies_invested, 120);
        assert_eq!(banking.total_bunnies_collected, 7);
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let raw = r#"{"name":"bob","display_name":"Bob","favorite_color":"teal"}"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();
        let encoded = serde_json::to_string(&user).unwrap();
        assert!(encoded.contains("favorite_color"));
    }
}
