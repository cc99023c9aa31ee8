//! Runtime configuration.

use std::path::Path;

use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::minor_units;

pub const ENV_SESSION_TTL_SECS: &str = "BANK_SESSION_TTL_SECS";
pub const ENV_OPENING_BALANCE: &str = "BANK_OPENING_BALANCE";
pub const ENV_AUTH_DB: &str = "BANK_AUTH_DB";
pub const ENV_LEDGER_DB: &str = "BANK_LEDGER_DB";

/// Longest accepted session lifetime (30 days).
pub const MAX_SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Largest accepted opening balance, leaving room for credits in minor units.
pub const MAX_OPENING_BALANCE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Absolute session lifetime; sessions are not extended on use
    pub session_ttl_secs: i64,

    /// Balance every new account opens with
    #[serde(with = "rust_decimal::serde::str")]
    pub opening_balance: Decimal,

    /// Type of the account created at registration
    pub default_account_type: String,

    /// Display name of the account created at registration
    pub default_account_name: String,

    /// Argon2id cost
    pub password: PasswordPolicy,

    /// Users and sessions
    pub auth_database_url: String,

    /// Accounts and transfers
    pub ledger_database_url: String,

    /// Pool size of each sqlite store
    pub max_connections: u32,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 30 * 60,
            opening_balance: Decimal::ONE_THOUSAND,
            default_account_type: "Savings".to_string(),
            default_account_name: "My Savings Account".to_string(),
            password: PasswordPolicy::default(),
            auth_database_url: "sqlite://bank-auth.db".to_string(),
            ledger_database_url: "sqlite://bank-ledger.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    /// Memory cost (KiB)
    pub memory_kib: u32,

    /// Time cost
    pub iterations: u32,

    /// Lanes
    pub parallelism: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl BankConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BankConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overridden from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(ttl) = std::env::var(ENV_SESSION_TTL_SECS) {
            self.session_ttl_secs = ttl.trim().parse().map_err(|e| ConfigError::Invalid {
                name: ENV_SESSION_TTL_SECS,
                reason: format!("{e}"),
            })?;
        }

        if let Ok(balance) = std::env::var(ENV_OPENING_BALANCE) {
            self.opening_balance =
                balance.trim().parse().map_err(|e| ConfigError::Invalid {
                    name: ENV_OPENING_BALANCE,
                    reason: format!("{e}"),
                })?;
        }

        if let Ok(url) = std::env::var(ENV_AUTH_DB) {
            self.auth_database_url = url;
        }

        if let Ok(url) = std::env::var(ENV_LEDGER_DB) {
            self.ledger_database_url = url;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.session_ttl_secs) {
            return Err(ConfigError::Invalid {
                name: "session_ttl_secs",
                reason: format!("must be between 1 and {MAX_SESSION_TTL_SECS}"),
            });
        }
        if self.opening_balance.is_sign_negative() || minor_units(self.opening_balance).is_none() {
            return Err(ConfigError::Invalid {
                name: "opening_balance",
                reason: "must be non-negative with at most 2 decimal places".to_string(),
            });
        }
        if self.opening_balance > MAX_OPENING_BALANCE {
            return Err(ConfigError::Invalid {
                name: "opening_balance",
                reason: format!("must not exceed {MAX_OPENING_BALANCE}"),
            });
        }
        for (name, value) in [
            ("default_account_type", &self.default_account_type),
            ("default_account_name", &self.default_account_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                name: "max_connections",
                reason: "must be positive".to_string(),
            });
        }
        argon2::Params::new(
            self.password.memory_kib,
            self.password.iterations,
            self.password.parallelism,
            None,
        )
        .map_err(|e| ConfigError::Invalid {
            name: "password",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Clamped to the accepted range, so an unvalidated config cannot overflow.
    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.session_ttl_secs.clamp(0, MAX_SESSION_TTL_SECS))
    }
}
