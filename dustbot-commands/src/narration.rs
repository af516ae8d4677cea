//! src/narration.rs
//!
//! Chat-completions client for fight narration. One POST, 30 s timeout, no
//! retry: a failed narration degrades to the plain result line.

use std::time::Duration;

use serde_json::{Value, json};

use dustbot_common::error::{Error, Result};

use crate::fighting::Loadout;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const NARRATION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Narrator {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl Narrator {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub async fn narrate(
        &self,
        fighters: &[(String, Loadout)],
        fight_log: &[String],
    ) -> Result<String> {
        let class_summary: Vec<String> = fighters
            .iter()
            .map(|(name, loadout)| {
                format!(
                    "{name}: Class={}, Weapon={}, Abilities={}, Special={}",
                    loadout.class_name,
                    loadout.weapon,
                    loadout.abilities.join(", "),
                    loadout.special
                )
            })
            .collect();

        let prompt = format!(
            "You are a fantasy battle narrator. Give a short, dramatic, and vivid battle report \
             (max 3 short sentences). Include the classes, weapons, abilities, and special events \
             that happened. Here are the fighters and their loadouts:\n{}\n\nHere is the fight log:\n\n{}",
            class_summary.join("\n"),
            fight_log.join("\n")
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(NARRATION_TIMEOUT)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "max_tokens": 300,
                "temperature": 0.7,
            }))
            .send()
            .await?;

        let data: Value = response.json().await?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| Error::Parse(format!("unexpected completion response: {data}")))
    }
}
