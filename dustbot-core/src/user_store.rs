//! src/user_store.rs
//!
//! Read-modify-write façade over the bus KV for the per-user aggregate.
//! Every mutation is fetch → decode → mutate → encode → SET with no
//! cross-process lock; last writer wins, so hot-path mutators must stay
//! additive or idempotent. A mutator error aborts the write entirely, which
//! is what keeps failed debits from leaking partial state.

use serde_json::Value;
use tracing::{debug, info};

use dustbot_bus::BusClient;
use dustbot_common::error::Result;
use dustbot_common::user::UserRecord;
use dustbot_common::{keys, normalize_username};

#[derive(Clone)]
pub struct UserStore {
    bus: BusClient,
}

impl UserStore {
    pub fn new(bus: BusClient) -> Self {
        Self { bus }
    }

    pub async fn get(&self, name: &str) -> Result<Option<UserRecord>> {
        let key = keys::user(name);
        match self.bus.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetches the aggregate, creating it with zeroed counters and empty
    /// sub-objects when absent. Folds any legacy keyspace for the name into
    /// the document first, deleting the legacy keys. Idempotent.
    pub async fn get_or_create(&self, name: &str, display_name: &str) -> Result<UserRecord> {
        let normalized = normalize_username(name);
        let key = keys::user(&normalized);

        let (mut user, created) = match self.bus.get(&key).await? {
            Some(raw) => (serde_json::from_str(&raw)?, false),
            None => {
                debug!("creating user aggregate for '{}'", normalized);
                (UserRecord::new(&normalized, display_name), true)
            }
        };

        if self.fold_legacy(&normalized, &mut user).await? || created {
            self.save(&user).await?;
        }

        Ok(user)
    }

    pub async fn save(&self, user: &UserRecord) -> Result<()> {
        let key = keys::user(&user.name);
        self.bus.set(&key, &serde_json::to_string(user)?).await
    }

    /// Applies `mutate` to the aggregate and persists the result. The write
    /// is skipped when the mutator fails, and the error is returned as-is so
    /// the call site can turn `InsufficientFunds` into a chat reply.
    pub async fn update<F>(&self, name: &str, display_name: &str, mutate: F) -> Result<UserRecord>
    where
        F: FnOnce(&mut UserRecord) -> Result<()>,
    {
        let mut user = self.get_or_create(name, display_name).await?;
        mutate(&mut user)?;
        self.save(&user).await?;
        Ok(user)
    }

    /// Folds `dustbunnies:<name>`, `banking:<name>` and `global:<name>`
    /// into the aggregate's sub-objects. `name`/`display_name` inside a
    /// legacy blob never reach a sub-object (the typed sub-objects simply
    /// have no such fields). Returns whether anything was folded.
    async fn fold_legacy(&self, name: &str, user: &mut UserRecord) -> Result<bool> {
        let mut folded = false;

        let dust_key = keys::legacy_dustbunnies(name);
        if let Some(raw) = self.bus.get(&dust_key).await? {
            if let Ok(legacy) = serde_json::from_str(&raw) {
                user.dustbunnies = Some(legacy);
                folded = true;
                info!("folded legacy key '{}' into user:{}", dust_key, name);
            }
            self.bus.del(&dust_key).await?;
        }

        let bank_key = keys::legacy_banking(name);
        if let Some(raw) = self.bus.get(&bank_key).await? {
            if let Ok(legacy) = serde_json::from_str(&raw) {
                user.banking = Some(legacy);
                folded = true;
                info!("folded legacy key '{}' into user:{}", bank_key, name);
            }
            self.bus.del(&bank_key).await?;
        }

        // global:<name> only ever carried lurk/unlurk counters, either as a
        // bare integer or as an object.
        let global_key = keys::legacy_global(name);
        if let Some(raw) = self.bus.get(&global_key).await? {
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Number(n)) => {
                    if let Some(lurk) = n.as_u64() {
                        user.log.lurk = lurk;
                        folded = true;
                    }
                }
                Ok(Value::Object(map)) => {
                    if let Some(lurk) = map.get("lurk").and_then(Value::as_u64) {
                        user.log.lurk = lurk;
                        folded = true;
                    }
                    if let Some(unlurk) = map.get("unlurk").and_then(Value::as_u64) {
                        user.log.unlurk = unlurk;
                        folded = true;
                    }
                }
                _ => {}
            }
            self.bus.del(&global_key).await?;
            if folded {
                info!("folded legacy key '{}' into user:{}", global_key, name);
            }
        }

        Ok(folded)
    }
}
