// 7.0 config.rs: all settings in one place. valuation weights, oracle bounds, rewards, engine limits.
// 7.1 every section has serde defaults so a deployment file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::oracle::OracleConfig;
use crate::types::Points;
use crate::valuation::ValuationParams;

/** 7.2: points granted by the marketplace itself rather than by a trade */
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    // Credited (category earned) to the owner when an item is listed
    pub listing_reward: Points,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            listing_reward: Points::new(10),
        }
    }
}

// The complete marketplace configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub valuation: ValuationParams,
    pub oracle: OracleConfig,
    pub rewards: RewardConfig,
    pub engine: EngineConfig,
}

impl MarketplaceConfig {
    // Local development: no oracle so valuations are reproducible
    pub fn development() -> Self {
        let mut config = Self::default();
        config.oracle.enabled = false;
        config
    }

    // Production: tighter oracle budget, deeper audit log
    pub fn production() -> Self {
        let mut config = Self::default();
        config.oracle.timeout_ms = 150;
        config.engine.max_events = 1_000_000;
        config
    }

    /// Parse a TOML document; keys that are absent keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.valuation;
        let multipliers = v.condition_multipliers;
        if [multipliers.excellent, multipliers.good, multipliers.fair, multipliers.poor, multipliers.unrated]
            .iter()
            .any(|m| m.is_sign_negative())
        {
            return Err(ConfigError::InvalidValuation {
                reason: "Condition multipliers must be non-negative".to_string(),
            });
        }

        let base = v.base_points;
        if [base.excellent, base.good, base.fair, base.poor, base.unrated]
            .iter()
            .any(|b| *b < 1)
        {
            return Err(ConfigError::InvalidValuation {
                reason: "Base points must be at least 1".to_string(),
            });
        }

        if v.demand_cap.is_sign_negative() || v.demand_cap.is_zero() {
            return Err(ConfigError::InvalidValuation {
                reason: "Demand cap must be positive".to_string(),
            });
        }

        if v.oracle_min_points < 1 || v.oracle_min_points > v.oracle_max_points {
            return Err(ConfigError::InvalidOracle {
                reason: "Oracle clamp range must satisfy 1 <= min <= max".to_string(),
            });
        }

        if self.oracle.enabled && self.oracle.timeout_ms == 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "Enabled oracle needs a non-zero timeout".to_string(),
            });
        }

        if self.oracle.enabled && self.oracle.workers == 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "Enabled oracle needs at least one worker".to_string(),
            });
        }

        if self.rewards.listing_reward.is_negative() {
            return Err(ConfigError::InvalidRewards {
                reason: "Listing reward cannot be negative".to_string(),
            });
        }

        let e = &self.engine;
        if e.max_events == 0 || e.default_page_size == 0 || e.default_page_size > e.max_page_size {
            return Err(ConfigError::InvalidEngine {
                reason: "Need max_events > 0 and 0 < default_page_size <= max_page_size".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid valuation params: {reason}")]
    InvalidValuation { reason: String },
    #[error("invalid oracle config: {reason}")]
    InvalidOracle { reason: String },
    #[error("invalid rewards: {reason}")]
    InvalidRewards { reason: String },
    #[error("invalid engine config: {reason}")]
    InvalidEngine { reason: String },
    #[error("config parse error: {reason}")]
    Parse { reason: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn config(&self) -> MarketplaceConfig {
        match self {
            Environment::Development => MarketplaceConfig::development(),
            Environment::Staging => MarketplaceConfig::default(),
            Environment::Production => MarketplaceConfig::production(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_valid() {
        let config = MarketplaceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rewards.listing_reward, Points::new(10));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Staging.config().validate().is_ok());
        assert!(Environment::Production.config().validate().is_ok());
        assert!(!Environment::Development.config().oracle.enabled);
        assert_eq!(Environment::Production.config().oracle.timeout_ms, 150);
    }

    #[test]
    fn test_invalid_oracle_range() {
        let mut config = MarketplaceConfig::default();
        config.valuation.oracle_min_points = 60;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOracle { .. })));
    }

    #[test]
    fn test_oracle_needs_workers() {
        let mut config = MarketplaceConfig::default();
        config.oracle.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOracle { .. })));
        config.oracle.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_multiplier() {
        let mut config = MarketplaceConfig::default();
        config.valuation.condition_multipliers.good = dec!(-0.1);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValuation { .. })));
    }

    #[test]
    fn test_invalid_pages() {
        let mut config = MarketplaceConfig::default();
        config.engine.default_page_size = config.engine.max_page_size + 1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEngine { .. })));
    }

    #[test]
    fn test_partial_toml_override() {
        let text = r#"
            [oracle]
            enabled = false

            [rewards]
            listing_reward = 25

            [valuation]
            wishlist_weight = "0.75"
        "#;
        let config = MarketplaceConfig::from_toml_str(text).unwrap();
        assert!(!config.oracle.enabled);
        assert_eq!(config.oracle.timeout_ms, OracleConfig::default().timeout_ms);
        assert_eq!(config.rewards.listing_reward, Points::new(25));
        assert_eq!(config.valuation.wishlist_weight, dec!(0.75));
        assert_eq!(config.valuation.base_points.excellent, 15);
    }

    #[test]
    fn test_toml_rejects_invalid_values() {
        let text = r#"
            [engine]
            max_events = 0
        "#;
        assert!(matches!(
            MarketplaceConfig::from_toml_str(text),
            Err(ConfigError::InvalidEngine { .. })
        ));
        assert!(matches!(
            MarketplaceConfig::from_toml_str("oracle = 3"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_config_serialization() {
        let config = MarketplaceConfig::production();
        let json = serde_json::to_string(&config).unwrap();
        let back: MarketplaceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.engine.max_events, config.engine.max_events);
        assert_eq!(back.valuation.demand_cap, config.valuation.demand_cap);
    }
}
