//! External-collaborator configuration surface.
//!
//! Credential prompting and the market-hours scheduling wrapper are out of
//! scope; this module only reads the values those collaborators are
//! expected to supply, taking `host`/`port`/credentials as plain
//! environment-backed fields rather than reaching into a config framework.
use crate::error::{EngineError, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    pub account_host: String,
    pub stream_host: String,
    pub risk_per_trade: f64,
    pub allocated_buying_power: f64,
    pub paper: bool,
}

impl Config {
    /// Reads the config surface from the environment. Every field is
    /// required except `PAPER`, which defaults to `true`.
    pub fn from_env() -> Result<Self> {
        let api_key = require_env("APCA_API_KEY_ID")?;
        let api_secret = require_env("APCA_API_SECRET_KEY")?;
        let paper = env::var("PAPER").map(|v| v != "false").unwrap_or(true);

        let account_host = env::var("APCA_API_BASE_URL").unwrap_or_else(|_| {
            if paper {
                "paper-api.alpaca.markets".to_string()
            } else {
                "api.alpaca.markets".to_string()
            }
        });
        let stream_host = env::var("APCA_STREAM_HOST").unwrap_or_else(|_| {
            if paper {
                "paper-api.alpaca.markets".to_string()
            } else {
                "api.alpaca.markets".to_string()
            }
        });

        let risk_per_trade = require_env("RISK_PER_TRADE")?
            .parse::<f64>()
            .map_err(|e| EngineError::PrecheckFailure(format!("RISK_PER_TRADE: {e}")))?;
        let allocated_buying_power = require_env("ALLOCATED_BUYING_POWER")?
            .parse::<f64>()
            .map_err(|e| {
                EngineError::PrecheckFailure(format!("ALLOCATED_BUYING_POWER: {e}"))
            })?;

        Ok(Config {
            api_key,
            api_secret,
            account_host,
            stream_host,
            risk_per_trade,
            allocated_buying_power,
            paper,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EngineError::PrecheckFailure(format!("missing env var {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_vars() {
        let err = require_env("QPL_BOT_DEFINITELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, EngineError::PrecheckFailure(_)));
    }
}
