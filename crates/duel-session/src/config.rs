//! Session configuration.
//!
//! Values are resolved in order: built-in defaults, an optional JSON file
//! named by `DUEL_CONFIG`, then individual `DUEL_*` environment variables.

use duel_core::{Stake, StakeOptions, TableLayout};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
}

/// Timing and table settings for a session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an incoming challenge stays on screen before it blinks
    pub visibility_timeout_ms: u64,
    /// Optional protocol expiry for unanswered outgoing challenges
    pub response_timeout_ms: Option<u64>,
    /// Pause between dealing and revealing
    pub settle_delay_ms: u64,
    /// Turn timer polling interval
    pub turn_poll_ms: u64,
    pub move_duration_ms: u64,
    pub flip_duration_ms: u64,
    /// How far past its duration a deal animation may run before it is skipped
    pub stall_grace_ms: u64,
    pub stakes: Vec<Stake>,
    pub hand_size: usize,
    pub layout: TableLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 60_000,
            response_timeout_ms: None,
            settle_delay_ms: 500,
            turn_poll_ms: 300,
            move_duration_ms: 300,
            flip_duration_ms: 250,
            stall_grace_ms: 2_000,
            stakes: vec![50, 100, 200, 500],
            hand_size: 5,
            layout: TableLayout::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults, then `DUEL_CONFIG` file, then env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("DUEL_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let millis = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                Some(value) => match value.trim().parse() {
                    Ok(ms) => Ok(Some(ms)),
                    Err(_) => Err(ConfigError::InvalidVar { var, value }),
                },
                None => Ok(None),
            }
        };

        if let Some(ms) = millis("DUEL_VISIBILITY_TIMEOUT_MS")? {
            self.visibility_timeout_ms = ms;
        }
        if let Some(ms) = millis("DUEL_RESPONSE_TIMEOUT_MS")? {
            self.response_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(ms) = millis("DUEL_SETTLE_DELAY_MS")? {
            self.settle_delay_ms = ms;
        }
        if let Some(ms) = millis("DUEL_TURN_POLL_MS")? {
            self.turn_poll_ms = ms;
        }
        if let Some(ms) = millis("DUEL_MOVE_MS")? {
            self.move_duration_ms = ms;
        }
        if let Some(ms) = millis("DUEL_FLIP_MS")? {
            self.flip_duration_ms = ms;
        }
        if let Some(ms) = millis("DUEL_STALL_GRACE_MS")? {
            self.stall_grace_ms = ms;
        }
        if let Some(size) = millis("DUEL_HAND_SIZE")? {
            self.hand_size = size as usize;
        }
        if let Some(value) = lookup("DUEL_STAKES") {
            let stakes: Result<Vec<Stake>, _> = value
                .split(',')
                .map(|s| s.trim().parse::<Stake>())
                .collect();
            self.stakes = stakes.map_err(|_| ConfigError::InvalidVar {
                var: "DUEL_STAKES",
                value,
            })?;
        }

        Ok(())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Never zero, tokio intervals reject a zero period
    pub fn turn_poll_interval(&self) -> Duration {
        Duration::from_millis(self.turn_poll_ms.max(1))
    }

    pub fn move_duration(&self) -> Duration {
        Duration::from_millis(self.move_duration_ms)
    }

    pub fn flip_duration(&self) -> Duration {
        Duration::from_millis(self.flip_duration_ms)
    }

    pub fn stall_grace(&self) -> Duration {
        Duration::from_millis(self.stall_grace_ms)
    }

    pub fn stake_options(&self) -> StakeOptions {
        StakeOptions::new(self.stakes.clone())
    }
}
