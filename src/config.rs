use crate::errors::EngineError;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BENCHMARK_TICKER: &str = "SPY";
pub const ENV_SETTING_PREFIX: &str = "ENGINE_";

type ConfigResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalanceFrequency {
    Weekly,
    #[default]
    Monthly,
    Quarterly,
}

impl RebalanceFrequency {
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            other => Err(EngineError::InvalidConfig(format!(
                "REBALANCE_FREQUENCY must be weekly, monthly or quarterly (value: {})",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiskProfile {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "moderate" => Ok(Self::Moderate),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(EngineError::InvalidConfig(format!(
                "RISK_PROFILE must be conservative, moderate or aggressive (value: {})",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }
}

/// Settings consumed by the simulation loop and the trade execution engine.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub rebalance_frequency: RebalanceFrequency,
    pub materiality_threshold: f64,
    pub dust_threshold: f64,
    pub risk_free_rate: f64,
    pub benchmark_ticker: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            commission_rate: 0.001,
            rebalance_frequency: RebalanceFrequency::Monthly,
            materiality_threshold: 0.01,
            dust_threshold: 0.001,
            risk_free_rate: 0.04,
            benchmark_ticker: DEFAULT_BENCHMARK_TICKER.to_string(),
        }
    }
}

impl BacktestConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let config = Self {
            initial_capital: setting_f64(settings, "INITIAL_CAPITAL", defaults.initial_capital)?,
            commission_rate: setting_f64(settings, "COMMISSION_RATE", defaults.commission_rate)?,
            rebalance_frequency: match optional_setting(settings, "REBALANCE_FREQUENCY") {
                Some(raw) => RebalanceFrequency::parse(raw)?,
                None => defaults.rebalance_frequency,
            },
            materiality_threshold: setting_f64(
                settings,
                "MATERIALITY_THRESHOLD",
                defaults.materiality_threshold,
            )?,
            dust_threshold: setting_f64(settings, "DUST_THRESHOLD", defaults.dust_threshold)?,
            risk_free_rate: setting_f64(settings, "RISK_FREE_RATE", defaults.risk_free_rate)?,
            benchmark_ticker: optional_setting(settings, "BENCHMARK_TICKER")
                .map(|value| value.to_ascii_uppercase())
                .unwrap_or(defaults.benchmark_ticker),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_capital <= 0.0 || !self.initial_capital.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "INITIAL_CAPITAL must be > 0 (value: {})",
                self.initial_capital
            )));
        }
        if !(0.0..1.0).contains(&self.commission_rate) {
            return Err(EngineError::InvalidConfig(format!(
                "COMMISSION_RATE must be in [0, 1) (value: {})",
                self.commission_rate
            )));
        }
        if !(0.0..1.0).contains(&self.materiality_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "MATERIALITY_THRESHOLD must be in [0, 1) (value: {})",
                self.materiality_threshold
            )));
        }
        if self.dust_threshold < 0.0 || !self.dust_threshold.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "DUST_THRESHOLD must be >= 0 (value: {})",
                self.dust_threshold
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "RISK_FREE_RATE must be finite (value: {})",
                self.risk_free_rate
            )));
        }
        if self.benchmark_ticker.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "BENCHMARK_TICKER must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Position caps and risk settings for the one-shot portfolio builder.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub risk_profile: RiskProfile,
    pub max_position: f64,
    pub min_position: f64,
    pub risk_free_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            risk_profile: RiskProfile::Moderate,
            max_position: 0.20,
            min_position: 0.02,
            risk_free_rate: 0.04,
        }
    }
}

impl OptimizerConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let config = Self {
            risk_profile: match optional_setting(settings, "RISK_PROFILE") {
                Some(raw) => RiskProfile::parse(raw)?,
                None => defaults.risk_profile,
            },
            max_position: setting_f64(settings, "MAX_POSITION", defaults.max_position)?,
            min_position: setting_f64(settings, "MIN_POSITION", defaults.min_position)?,
            risk_free_rate: setting_f64(settings, "RISK_FREE_RATE", defaults.risk_free_rate)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.max_position) {
            return Err(EngineError::InvalidConfig(format!(
                "MAX_POSITION must be in [0, 1] (value: {})",
                self.max_position
            )));
        }
        if !(0.0..=1.0).contains(&self.min_position) {
            return Err(EngineError::InvalidConfig(format!(
                "MIN_POSITION must be in [0, 1] (value: {})",
                self.min_position
            )));
        }
        if self.min_position > self.max_position {
            return Err(EngineError::InvalidConfig(format!(
                "MIN_POSITION ({}) must be <= MAX_POSITION ({})",
                self.min_position, self.max_position
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "RISK_FREE_RATE must be finite (value: {})",
                self.risk_free_rate
            )));
        }
        Ok(())
    }
}

/// Fan-out settings for the persona ensemble queries.
#[derive(Debug, Clone)]
pub struct AiConsensusConfig {
    pub workers: usize,
    pub persona_timeout: Duration,
}

impl Default for AiConsensusConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            persona_timeout: Duration::from_secs(120),
        }
    }
}

impl AiConsensusConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> ConfigResult<Self> {
        let defaults = Self::default();
        let workers = setting_usize(settings, "PERSONA_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(EngineError::InvalidConfig(
                "PERSONA_WORKERS must be >= 1 (value: 0)".to_string(),
            ));
        }
        let timeout_secs = setting_f64(
            settings,
            "PERSONA_TIMEOUT_SECS",
            defaults.persona_timeout.as_secs_f64(),
        )?;
        if timeout_secs <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "PERSONA_TIMEOUT_SECS must be > 0 (value: {})",
                timeout_secs
            )));
        }
        let persona_timeout = Duration::try_from_secs_f64(timeout_secs).map_err(|_| {
            EngineError::InvalidConfig(format!(
                "PERSONA_TIMEOUT_SECS is out of range (value: {})",
                timeout_secs
            ))
        })?;
        Ok(Self {
            workers,
            persona_timeout,
        })
    }
}

/// Collects `ENGINE_*` variables from the process environment, keyed without the prefix.
pub fn settings_from_env() -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_SETTING_PREFIX)
                .map(|stripped| (stripped.to_string(), value))
        })
        .collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(settings: &HashMap<String, String>, key: &str, default: f64) -> ConfigResult<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw.parse::<f64>().map_err(|_| {
        EngineError::InvalidConfig(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(EngineError::InvalidConfig(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> ConfigResult<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    raw.parse::<usize>().map_err(|_| {
        EngineError::InvalidConfig(format!(
            "Setting {} must be a non-negative integer (value: {})",
            key, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_settings_use_defaults() {
        let config = BacktestConfig::from_settings_map(&HashMap::new()).unwrap();
        assert!((config.initial_capital - 100_000.0).abs() < 1e-9);
        assert!((config.commission_rate - 0.001).abs() < 1e-12);
        assert_eq!(config.rebalance_frequency, RebalanceFrequency::Monthly);
        assert!((config.materiality_threshold - 0.01).abs() < 1e-12);
        assert!((config.risk_free_rate - 0.04).abs() < 1e-12);
        assert_eq!(config.benchmark_ticker, "SPY");
    }

    #[test]
    fn parses_overrides_case_insensitively() {
        let config = BacktestConfig::from_settings_map(&settings(&[
            ("INITIAL_CAPITAL", "2500"),
            ("REBALANCE_FREQUENCY", " Quarterly "),
            ("BENCHMARK_TICKER", "qqq"),
        ]))
        .unwrap();
        assert!((config.initial_capital - 2_500.0).abs() < 1e-9);
        assert_eq!(config.rebalance_frequency, RebalanceFrequency::Quarterly);
        assert_eq!(config.benchmark_ticker, "QQQ");
    }

    #[test]
    fn rejects_out_of_range_commission() {
        let err = BacktestConfig::from_settings_map(&settings(&[("COMMISSION_RATE", "1.0")]))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(message) if message.contains("COMMISSION_RATE")));
    }

    #[test]
    fn rejects_non_positive_capital_and_garbage_numbers() {
        assert!(BacktestConfig::from_settings_map(&settings(&[("INITIAL_CAPITAL", "0")])).is_err());
        assert!(
            BacktestConfig::from_settings_map(&settings(&[("INITIAL_CAPITAL", "lots")])).is_err()
        );
        assert!(RebalanceFrequency::parse("daily").is_err());
    }

    #[test]
    fn optimizer_caps_must_be_ordered() {
        let err = OptimizerConfig::from_settings_map(&settings(&[
            ("MIN_POSITION", "0.3"),
            ("MAX_POSITION", "0.2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let config =
            OptimizerConfig::from_settings_map(&settings(&[("RISK_PROFILE", "AGGRESSIVE")]))
                .unwrap();
        assert_eq!(config.risk_profile, RiskProfile::Aggressive);
    }

    #[test]
    fn ai_consensus_settings_validate_workers_and_timeout() {
        let config = AiConsensusConfig::from_settings_map(&settings(&[
            ("PERSONA_WORKERS", "2"),
            ("PERSONA_TIMEOUT_SECS", "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.persona_timeout, Duration::from_millis(500));

        assert!(
            AiConsensusConfig::from_settings_map(&settings(&[("PERSONA_WORKERS", "0")])).is_err()
        );
        assert!(
            AiConsensusConfig::from_settings_map(&settings(&[("PERSONA_TIMEOUT_SECS", "-1")]))
                .is_err()
        );
    }

    #[test]
    fn persona_timeout_beyond_duration_range_is_rejected() {
        let err =
            AiConsensusConfig::from_settings_map(&settings(&[("PERSONA_TIMEOUT_SECS", "1e300")]))
                .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert!(err.to_string().contains("PERSONA_TIMEOUT_SECS"));
    }
}
