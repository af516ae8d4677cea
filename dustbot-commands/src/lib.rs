// src/lib.rs

pub mod banking;
pub mod fighting;
pub mod gambling;
pub mod loggers;
pub mod narration;

pub use dustbot_common::error::{Error, Result};
