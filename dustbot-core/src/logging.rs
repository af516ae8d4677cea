//! src/logging.rs
//!
//! Structured bus logging. Process logs go through `tracing`; the records a
//! dashboard or the system logger consumes go to `system.log.<component>`
//! as JSON and never into `chat.send`.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use dustbot_bus::BusClient;
use dustbot_common::topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusLogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Startup,
}

impl BusLogLevel {
    pub fn value(self) -> u32 {
        match self {
            BusLogLevel::Debug => 10,
            BusLogLevel::Info => 20,
            BusLogLevel::Warning => 30,
            BusLogLevel::Error => 40,
            BusLogLevel::Critical => 50,
            BusLogLevel::Startup => 60,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BusLogLevel::Debug => "DEBUG",
            BusLogLevel::Info => "INFO",
            BusLogLevel::Warning => "WARNING",
            BusLogLevel::Error => "ERROR",
            BusLogLevel::Critical => "CRITICAL",
            BusLogLevel::Startup => "STARTUP",
        }
    }
}

/// Call-site information captured by [`caller!`].
#[derive(Debug, Clone, Serialize)]
pub struct Caller {
    pub filename: &'static str,
    pub lineno: u32,
    pub function: &'static str,
}

/// Builds a [`Caller`] for the current source location.
#[macro_export]
macro_rules! caller {
    () => {
        $crate::logging::Caller {
            filename: file!(),
            lineno: line!(),
            function: module_path!(),
        }
    };
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: u32,
    pub level_name: &'static str,
    pub content: String,
    pub timestamp: String,
    pub caller: Caller,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<Value>,
}

/// Publishes log records for one component, suppressing anything below the
/// component's declared level.
#[derive(Clone)]
pub struct BusLogger {
    bus: BusClient,
    topic: String,
    min_level: BusLogLevel,
}

impl BusLogger {
    pub fn new(bus: BusClient, component: &str, min_level: BusLogLevel) -> Self {
        Self {
            bus,
            topic: topics::system_log(component),
            min_level,
        }
    }

    pub async fn log(&self, level: BusLogLevel, content: impl Into<String>, caller: Caller) {
        self.log_with(level, content, caller, None).await;
    }

    pub async fn log_with(
        &self,
        level: BusLogLevel,
        content: impl Into<String>,
        caller: Caller,
        extra_data: Option<Value>,
    ) {
        if level < self.min_level {
            return;
        }
        let record = LogRecord {
            level: level.value(),
            level_name: level.name(),
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
            caller,
            extra_data,
        };
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to encode log record: {:?}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(&self.topic, &payload).await {
            warn!("failed to publish log record to {}: {:?}", self.topic, e);
        }
    }
}

pub fn init_tracing() {
    let filter =
        EnvFilter::from_default_env().add_directive("dustbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(sub);
}
