//! Signing configuration.
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::invoice::sign::SigningOptions;
use crate::invoice::xml::constants::BODY_ID;

/// Guatemala does not observe daylight saving; local time is always UTC-06:00.
pub const GUATEMALA_UTC_OFFSET_MINUTES: i32 = -6 * 60;

/// How the `Id` family of a signature is minted.
/// - Random: a fresh random base per signature (the usual choice).
/// - Derived: a caller-chosen base, which makes output reproducible.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use felgt_core::config::IdStrategy;
///
/// let strategy = IdStrategy::from_str("derived:fel-0001")?;
/// assert_eq!(strategy, IdStrategy::Derived("fel-0001".into()));
/// assert_eq!(strategy.to_string(), "derived:fel-0001");
/// # Ok::<(), felgt_core::config::IdStrategyParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IdStrategy {
    #[default]
    Random,
    Derived(String),
}

/// Error returned when parsing an [`IdStrategy`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdStrategyParseError {
    #[error("invalid id strategy: {input}")]
    Invalid { input: String },
}

impl FromStr for IdStrategy {
    type Err = IdStrategyParseError;
    fn from_str(input: &str) -> Result<IdStrategy, IdStrategyParseError> {
        let invalid = || IdStrategyParseError::Invalid {
            input: input.to_string(),
        };
        if input.eq_ignore_ascii_case("random") {
            return Ok(IdStrategy::Random);
        }
        match input.split_once(':') {
            Some((kind, base)) if kind.eq_ignore_ascii_case("derived") && !base.is_empty() => {
                Ok(IdStrategy::Derived(base.to_string()))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for IdStrategy {
    type Error = IdStrategyParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IdStrategy> for String {
    fn from(strategy: IdStrategy) -> Self {
        strategy.to_string()
    }
}

impl std::fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdStrategy::Random => f.write_str("random"),
            IdStrategy::Derived(base) => write!(f, "derived:{base}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("UTC offset of {minutes} minutes is out of range")]
    InvalidOffset { minutes: i32 },
}

/// Serializable signing settings, typically read from the caller's own config file.
///
/// # Examples
/// ```rust
/// use felgt_core::config::{IdStrategy, SigningConfig};
/// use felgt_core::invoice::sign::SigningOptions;
///
/// let config = SigningConfig::default().with_id_strategy(IdStrategy::Derived("a1".into()));
/// let options = SigningOptions::try_from(&config)?;
/// assert!(options.include_key_value());
/// # Ok::<(), felgt_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    utc_offset_minutes: i32,
    include_key_value: bool,
    wrap_base64: bool,
    id_strategy: IdStrategy,
    body_id: String,
}

impl SigningConfig {
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_include_key_value(mut self, include: bool) -> Self {
        self.include_key_value = include;
        self
    }

    pub fn with_wrap_base64(mut self, wrap: bool) -> Self {
        self.wrap_base64 = wrap;
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_body_id(mut self, body_id: impl Into<String>) -> Self {
        self.body_id = body_id.into();
        self
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidOffset {
                minutes: self.utc_offset_minutes,
            })
    }

    pub fn include_key_value(&self) -> bool {
        self.include_key_value
    }

    pub fn wrap_base64(&self) -> bool {
        self.wrap_base64
    }

    pub fn id_strategy(&self) -> &IdStrategy {
        &self.id_strategy
    }

    pub fn body_id(&self) -> &str {
        &self.body_id
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        SigningConfig {
            utc_offset_minutes: GUATEMALA_UTC_OFFSET_MINUTES,
            include_key_value: true,
            wrap_base64: true,
            id_strategy: IdStrategy::Random,
            body_id: BODY_ID.to_string(),
        }
    }
}

impl TryFrom<&SigningConfig> for SigningOptions {
    type Error = ConfigError;
    fn try_from(config: &SigningConfig) -> Result<Self, ConfigError> {
        Ok(SigningOptions::default()
            .with_utc_offset(config.utc_offset()?)
            .with_include_key_value(config.include_key_value)
            .with_wrap_base64(config.wrap_base64)
            .with_id_strategy(config.id_strategy.clone())
            .with_body_id(config.body_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_strategy_parses_known_forms() {
        assert_eq!("random".parse::<IdStrategy>(), Ok(IdStrategy::Random));
        assert_eq!("RANDOM".parse::<IdStrategy>(), Ok(IdStrategy::Random));
        assert_eq!(
            "derived:abc-1".parse::<IdStrategy>(),
            Ok(IdStrategy::Derived("abc-1".into()))
        );
        assert_eq!(
            "derived:".parse::<IdStrategy>(),
            Err(IdStrategyParseError::Invalid {
                input: "derived:".into()
            })
        );
        assert!("sequential".parse::<IdStrategy>().is_err());
    }

    #[test]
    fn default_config_matches_guatemala() {
        let config = SigningConfig::default();
        assert_eq!(config.utc_offset().map(|o| o.local_minus_utc()), Ok(-6 * 3600));
        assert!(config.include_key_value());
        assert!(config.wrap_base64());
        assert_eq!(config.body_id(), "DatosEmision");
        assert_eq!(config.id_strategy(), &IdStrategy::Random);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let config = SigningConfig::default().with_utc_offset_minutes(24 * 60);
        assert_eq!(
            config.utc_offset(),
            Err(ConfigError::InvalidOffset { minutes: 24 * 60 })
        );
        assert!(SigningOptions::try_from(&config).is_err());
    }

    #[test]
    fn config_converts_into_options() {
        let config = SigningConfig::default()
            .with_include_key_value(false)
            .with_wrap_base64(false)
            .with_id_strategy(IdStrategy::Derived("x".into()))
            .with_body_id("Cuerpo");
        let options = SigningOptions::try_from(&config).expect("options");
        assert!(!options.include_key_value());
        assert!(!options.wrap_base64());
        assert_eq!(options.id_strategy(), &IdStrategy::Derived("x".into()));
        assert_eq!(options.body_id(), "Cuerpo");
        assert_eq!(options.utc_offset().local_minus_utc(), -6 * 3600);
    }
}
