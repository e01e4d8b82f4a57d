//! Process-wide settings.
//!
//! The de-duplication flag is read by every merge. Set it once at startup,
//! before any context carries fields that rely on override semantics.
//! Changing it later affects subsequent merges only; field sets already bound
//! to a context are never rewritten.
//!
//! The caller flag makes emitters attach the `file:line` of each log call.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::errors::{FieldsError, Result};

pub const DEDUP_ENV: &str = "LOGFIELDS_DEDUP";
pub const LEVEL_ENV: &str = "LOGFIELDS_LEVEL";
pub const CALLER_ENV: &str = "LOGFIELDS_CALLER";

static DEDUPLICATION_ENABLED: AtomicBool = AtomicBool::new(false);
static CALLER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enables or disables key de-duplication in [`Fields::with`](crate::Fields::with).
pub fn set_deduplication_enabled(enabled: bool) {
    DEDUPLICATION_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn deduplication_enabled() -> bool {
    DEDUPLICATION_ENABLED.load(Ordering::Relaxed)
}

/// Enables or disables the `caller` field on emitted log lines.
pub fn set_caller_enabled(enabled: bool) {
    CALLER_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn caller_enabled() -> bool {
    CALLER_ENABLED.load(Ordering::Relaxed)
}

/// Startup configuration for the field engine and its emitter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Drop older same-named keys when a newer layer supplies them.
    pub deduplicate: bool,
    /// Maximum `tracing` level name, e.g. "info".
    pub level: String,
    /// Attach the `file:line` of each log call as a `caller` field.
    pub caller: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deduplicate: false,
            level: "info".to_string(),
            caller: false,
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| FieldsError::Config(e.to_string()))
    }

    /// Reads `LOGFIELDS_DEDUP`, `LOGFIELDS_LEVEL` and `LOGFIELDS_CALLER`;
    /// unset variables keep defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(DEDUP_ENV) {
            config.deduplicate = parse_flag(DEDUP_ENV, &raw)?;
        }
        if let Ok(level) = std::env::var(LEVEL_ENV) {
            config.level = level;
        }
        if let Ok(raw) = std::env::var(CALLER_ENV) {
            config.caller = parse_flag(CALLER_ENV, &raw)?;
        }
        Ok(config)
    }

    /// Layers explicit settings (e.g. command-line flags) over this config.
    /// `None` keeps the current value.
    pub fn overridden(
        mut self,
        deduplicate: Option<bool>,
        level: Option<&str>,
        caller: Option<bool>,
    ) -> Self {
        if let Some(deduplicate) = deduplicate {
            self.deduplicate = deduplicate;
        }
        if let Some(level) = level {
            self.level = level.to_string();
        }
        if let Some(caller) = caller {
            self.caller = caller;
        }
        self
    }

    pub fn max_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| FieldsError::InvalidLevel(self.level.clone()))
    }

    /// Installs the settings process-wide.
    pub fn apply(&self) {
        set_deduplication_enabled(self.deduplicate);
        set_caller_enabled(self.caller);
        tracing::debug!(
            deduplicate = self.deduplicate,
            caller = self.caller,
            "field config applied"
        );
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(FieldsError::Config(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}
