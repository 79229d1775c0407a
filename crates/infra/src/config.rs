//! Engine configuration loaded from the process environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `STOCK_ALLOCATION_ORDER` | `fifo` | `fifo` or `fefo` candidate ordering |
//! | `STOCK_COMMIT_ATTEMPTS` | `2` | read-plan-commit cycles before `TransactionAborted` |
//! | `STOCK_FILM_EXHAUSTION_M` | `0.001` | film lots at or below this many meters become `used` |
//! | `STOCK_CHEMICAL_EXHAUSTION` | `0.001` | same threshold for chemical lots |
//! | `DATABASE_URL` | unset | selects the Postgres store when present |

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_inventory::{AllocationOrder, Amount, ExhaustionPolicy};

pub const ALLOCATION_ORDER_VAR: &str = "STOCK_ALLOCATION_ORDER";
pub const COMMIT_ATTEMPTS_VAR: &str = "STOCK_COMMIT_ATTEMPTS";
pub const FILM_EXHAUSTION_VAR: &str = "STOCK_FILM_EXHAUSTION_M";
pub const CHEMICAL_EXHAUSTION_VAR: &str = "STOCK_CHEMICAL_EXHAUSTION";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Tunables of the allocation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub allocation_order: AllocationOrder,
    /// Total attempts, including the first; at least 1.
    pub commit_attempts: u32,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allocation_order: AllocationOrder::Fifo,
            commit_attempts: 2,
            exhaustion: ExhaustionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = read(ALLOCATION_ORDER_VAR) {
            config.allocation_order = raw.parse().map_err(|e| ConfigError::Invalid {
                key: ALLOCATION_ORDER_VAR,
                message: format!("{e}"),
            })?;
        }

        if let Some(raw) = read(COMMIT_ATTEMPTS_VAR) {
            let attempts: u32 = raw.parse().map_err(|e| ConfigError::Invalid {
                key: COMMIT_ATTEMPTS_VAR,
                message: format!("{raw}: {e}"),
            })?;
            if attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: COMMIT_ATTEMPTS_VAR,
                    message: "must be at least 1".to_string(),
                });
            }
            config.commit_attempts = attempts;
        }

        if let Some(raw) = read(FILM_EXHAUSTION_VAR) {
            config.exhaustion.film = parse_threshold(FILM_EXHAUSTION_VAR, &raw)?;
        }
        if let Some(raw) = read(CHEMICAL_EXHAUSTION_VAR) {
            config.exhaustion.chemical = parse_threshold(CHEMICAL_EXHAUSTION_VAR, &raw)?;
        }

        Ok(config)
    }

    pub fn with_order(mut self, order: AllocationOrder) -> Self {
        self.allocation_order = order;
        self
    }

    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }

    pub fn with_exhaustion(mut self, exhaustion: ExhaustionPolicy) -> Self {
        self.exhaustion = exhaustion;
        self
    }
}

fn parse_threshold(key: &'static str, raw: &str) -> Result<Amount, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid { key, message };
    let value = Decimal::from_str(raw.trim()).map_err(|e| invalid(format!("{raw}: {e}")))?;
    if value < Decimal::ZERO {
        return Err(invalid(format!("{raw} is negative")));
    }
    Amount::from_decimal(value).map_err(|e| invalid(format!("{raw}: {e}")))
}

/// Postgres connection string, when one is configured.
pub fn database_url() -> Option<String> {
    std::env::var(DATABASE_URL_VAR)
        .ok()
        .filter(|url| !url.trim().is_empty())
}
