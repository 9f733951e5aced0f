use crate::config::{settings_from_env, AiConsensusConfig, BacktestConfig, OptimizerConfig};
use crate::data_context::MarketData;
use crate::signals::{default_personas, RecordedEnsemble, SignalEnsemble};
use crate::ticker_utils::normalize_ticker_symbol;
use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Market data plus the merged settings every command reads its config from.
pub struct AppContext {
    market_data: MarketData,
    settings: HashMap<String, String>,
}

impl AppContext {
    /// Loads a snapshot and layers CLI overrides and `ENGINE_*` environment
    /// variables on top of its settings.
    pub fn from_data_file<P: AsRef<Path>>(
        data_file: P,
        cli_overrides: HashMap<String, String>,
    ) -> Result<Self> {
        let market_data = MarketData::load_from_file(data_file.as_ref())?;
        Ok(Self::new(market_data, cli_overrides, settings_from_env()))
    }

    pub fn new(
        market_data: MarketData,
        cli_overrides: HashMap<String, String>,
        env_overrides: HashMap<String, String>,
    ) -> Self {
        let settings = merge_settings(market_data.settings(), cli_overrides, env_overrides);
        debug!("Resolved {} settings", settings.len());
        Self {
            market_data,
            settings,
        }
    }

    pub fn market_data(&self) -> &MarketData {
        &self.market_data
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn backtest_config(&self) -> Result<BacktestConfig> {
        BacktestConfig::from_settings_map(&self.settings).context("Invalid backtest settings")
    }

    pub fn optimizer_config(&self) -> Result<OptimizerConfig> {
        OptimizerConfig::from_settings_map(&self.settings).context("Invalid optimizer settings")
    }

    pub fn ai_config(&self) -> Result<AiConsensusConfig> {
        AiConsensusConfig::from_settings_map(&self.settings)
            .context("Invalid persona ensemble settings")
    }

    /// Ensemble replaying persona signals recorded in the snapshot.
    pub fn recorded_ensemble(&self) -> Arc<dyn SignalEnsemble> {
        Arc::new(RecordedEnsemble::from_market_data(
            &self.market_data,
            default_personas(),
        ))
    }

    pub fn has_recorded_signals(&self) -> bool {
        self.market_data
            .tickers()
            .iter()
            .any(|ticker| self.market_data.persona_signals_for(ticker).is_some())
    }

    /// Requested tickers, or every non-benchmark ticker in the snapshot when
    /// none were given.
    pub fn resolve_tickers(&self, requested: &[String]) -> Vec<String> {
        let tickers: Vec<String> = requested
            .iter()
            .filter_map(|ticker| normalize_ticker_symbol(ticker))
            .collect();
        if !tickers.is_empty() {
            return tickers;
        }
        let all = self.market_data.tickers();
        info!("No tickers requested; using all {} in snapshot", all.len());
        all
    }
}

/// Later layers win: snapshot settings, then CLI flags, then environment.
pub fn merge_settings(
    snapshot: &HashMap<String, String>,
    cli_overrides: HashMap<String, String>,
    env_overrides: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = snapshot.clone();
    for (key, value) in cli_overrides.into_iter().chain(env_overrides) {
        merged.insert(key.to_ascii_uppercase(), value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RebalanceFrequency;

    fn pairs(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn environment_beats_cli_beats_snapshot() {
        let mut data = MarketData::new("SPY");
        data.set_setting("COMMISSION_RATE", "0.002");
        data.set_setting("INITIAL_CAPITAL", "5000");
        data.set_setting("REBALANCE_FREQUENCY", "weekly");

        let ctx = AppContext::new(
            data,
            pairs(&[("INITIAL_CAPITAL", "7000"), ("REBALANCE_FREQUENCY", "quarterly")]),
            pairs(&[("REBALANCE_FREQUENCY", "monthly")]),
        );
        let config = ctx.backtest_config().unwrap();
        assert!((config.commission_rate - 0.002).abs() < 1e-12);
        assert!((config.initial_capital - 7000.0).abs() < 1e-12);
        assert_eq!(config.rebalance_frequency, RebalanceFrequency::Monthly);
    }

    #[test]
    fn invalid_setting_surfaces_as_error() {
        let ctx = AppContext::new(
            MarketData::new("SPY"),
            pairs(&[("MAX_POSITION", "lots")]),
            HashMap::new(),
        );
        let err = ctx.optimizer_config().unwrap_err();
        assert!(format!("{:#}", err).contains("MAX_POSITION"));
    }

    #[test]
    fn empty_request_means_every_snapshot_ticker() {
        let mut data = MarketData::new("SPY");
        data.insert_series("BBB", Vec::new());
        data.insert_series("AAA", Vec::new());
        data.insert_series("SPY", Vec::new());
        let ctx = AppContext::new(data, HashMap::new(), HashMap::new());
        assert_eq!(
            ctx.resolve_tickers(&[]),
            vec!["AAA".to_string(), "BBB".to_string()]
        );
        assert_eq!(ctx.resolve_tickers(&[" msft ".to_string()]), vec!["MSFT".to_string()]);
    }
}
