use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Strategy parameters keyed by name, e.g. `shortLookback` or `momentumFloor`.
pub type StrategyParams = HashMap<String, f64>;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &StrategyParams, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &StrategyParams,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a parameter as usize, rounded, with a minimum value
pub fn get_param_usize_at_least(
    params: &StrategyParams,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or_else(|| default.max(min))
}

/// Parses `key=value` pairs given on the command line.
pub fn parse_param_overrides(raw: &[String]) -> Result<StrategyParams> {
    let mut params = StrategyParams::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter {} must look like name=value", entry))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Parameter {} has an empty name", entry));
        }
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("Parameter {} must have a numeric value", entry))?;
        if !value.is_finite() {
            return Err(anyhow!("Parameter {} must be finite", entry));
        }
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_non_finite_params_use_defaults() {
        let mut params = StrategyParams::new();
        params.insert("bad".to_string(), f64::NAN);
        assert_eq!(get_param_f64(&params, "missing", 0.6), 0.6);
        assert_eq!(get_param_f64(&params, "bad", 0.4), 0.4);
        assert_eq!(get_param_f64_clamped(&params, "bad", 0.2, 0.0, 1.0), 0.2);
        assert_eq!(get_param_usize_at_least(&params, "bad", 63, 2), 63);
    }

    #[test]
    fn usize_params_round_and_respect_minimum() {
        let mut params = StrategyParams::new();
        params.insert("lookback".to_string(), 20.6);
        params.insert("tiny".to_string(), -3.0);
        assert_eq!(get_param_usize_at_least(&params, "lookback", 63, 2), 21);
        assert_eq!(get_param_usize_at_least(&params, "tiny", 63, 2), 2);
    }

    #[test]
    fn overrides_parse_name_value_pairs() {
        let params = parse_param_overrides(&[
            "shortLookback=42".to_string(),
            " shortWeight = 0.7 ".to_string(),
        ])
        .unwrap();
        assert_eq!(params["shortLookback"], 42.0);
        assert_eq!(params["shortWeight"], 0.7);

        assert!(parse_param_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_param_overrides(&["=1".to_string()]).is_err());
        assert!(parse_param_overrides(&["x=abc".to_string()]).is_err());
    }
}
