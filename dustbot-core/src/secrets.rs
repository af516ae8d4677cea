//! src/secrets.rs
//!
//! Secrets live in the bus KV under the `env:` namespace and are read once
//! at startup. A worker missing a required secret logs ERROR and exits
//! non-zero; the supervisor records the exit and does not restart it.

use dustbot_bus::BusClient;
use dustbot_common::error::{Error, Result};
use dustbot_common::keys;

pub const TWITCH_CLIENT_ID: &str = "TWITCH_CLIENT_ID";
pub const TWITCH_CLIENT_SECRET: &str = "TWITCH_CLIENT_SECRET";
pub const TWITCH_TOKEN_MAIN: &str = "twitch_token_main";
pub const OBS_HOST: &str = "OBS_HOST";
pub const OBS_PASSWORD: &str = "OBS_PASSWORD";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_API_BASE: &str = "OPENAI_API_BASE";

#[derive(Clone)]
pub struct SecretStore {
    bus: BusClient,
}

impl SecretStore {
    pub fn new(bus: BusClient) -> Self {
        Self { bus }
    }

    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        self.bus.get(&keys::env(name)).await
    }

    pub async fn require(&self, name: &str) -> Result<String> {
        self.get(name)
            .await?
            .ok_or_else(|| Error::MissingSecret(name.to_string()))
    }
}
