use crate::config::{AiConsensusConfig, OptimizerConfig};
use crate::models::{ConsensusSignal, SignalDirection, TargetAllocation};
use crate::optimizer::{AssetCandidate, HistoricalStats, PortfolioOptimizer};
use crate::signals::SignalEnsemble;
use crate::strategy::ai_consensus::{gather_consensus, DEFAULT_HISTORY_WINDOW};
use crate::strategy::{StrategyContext, StrategySignalProvider};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Two trading years of closes feed the historical estimates.
const STATS_WINDOW: usize = 504;
/// Confidence assumed for tickers without an ensemble opinion.
const UNSCORED_CONFIDENCE: f64 = 50.0;

/// Builds optimizer candidates for priced tickers as of `date`. Tickers
/// missing from `consensus` are treated as neutral.
pub fn build_candidates(
    tickers: &[String],
    date: NaiveDate,
    ctx: &StrategyContext<'_>,
    consensus: &BTreeMap<String, ConsensusSignal>,
    risk_free_rate: f64,
) -> Vec<AssetCandidate> {
    tickers
        .iter()
        .filter(|ticker| ctx.prices.price_on(ticker, date).is_some())
        .map(|ticker| {
            let history = ctx.prices.history_until(ticker, date);
            let window = &history[history.len().saturating_sub(STATS_WINDOW)..];
            let historical = match HistoricalStats::from_prices(ticker, window, risk_free_rate) {
                Ok(stats) => Some(stats),
                Err(gap) => {
                    debug!("{}: {}; using default volatility", ticker, gap);
                    None
                }
            };
            let fundamentals = ctx.fundamentals.snapshot(ticker, date).ok();
            let (signal, confidence) = consensus
                .get(ticker)
                .map(|c| (c.signal, c.confidence))
                .unwrap_or((SignalDirection::Neutral, UNSCORED_CONFIDENCE));
            AssetCandidate {
                ticker: ticker.clone(),
                signal,
                confidence,
                beta: fundamentals.as_ref().and_then(|f| f.beta),
                sector: fundamentals.and_then(|f| f.sector),
                historical,
            }
        })
        .collect()
}

/// Rebalances into the optimizer's allocation, re-estimated on every date.
pub struct OptimizedStrategy {
    name: String,
    optimizer: PortfolioOptimizer,
    ensemble: Option<Arc<dyn SignalEnsemble>>,
    runtime: Option<Handle>,
    ai_config: AiConsensusConfig,
}

impl OptimizedStrategy {
    pub fn new(
        config: OptimizerConfig,
        ensemble: Option<Arc<dyn SignalEnsemble>>,
        runtime: Option<Handle>,
        ai_config: AiConsensusConfig,
    ) -> Self {
        Self {
            name: "optimized".to_string(),
            optimizer: PortfolioOptimizer::new(config),
            ensemble,
            runtime,
            ai_config,
        }
    }

    fn consensus(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> BTreeMap<String, ConsensusSignal> {
        let (Some(ensemble), Some(runtime)) = (&self.ensemble, &self.runtime) else {
            return BTreeMap::new();
        };
        gather_consensus(
            ensemble,
            runtime,
            &self.ai_config,
            tickers,
            date,
            ctx,
            DEFAULT_HISTORY_WINDOW,
        )
        .into_iter()
        .map(|signal| (signal.ticker.clone(), signal))
        .collect()
    }
}

impl StrategySignalProvider for OptimizedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_weights(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> TargetAllocation {
        let consensus = self.consensus(tickers, date, ctx);
        let candidates = build_candidates(
            tickers,
            date,
            ctx,
            &consensus,
            self.optimizer.config().risk_free_rate,
        );
        match self.optimizer.build_portfolio(candidates) {
            Ok(analysis) => analysis
                .assets
                .into_iter()
                .map(|asset| (asset.ticker, asset.weight))
                .collect(),
            Err(err) => {
                warn!("Optimizer skipped on {}: {}; holding cash", date, err);
                TargetAllocation::new()
            }
        }
    }

    fn warmup_days(&self) -> i64 {
        // One trading year of closes for the historical estimates.
        (HistoricalStats::MIN_POINTS as i64 * 7) / 5 + 28
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_context::MarketData;
    use crate::models::{Fundamentals, PricePoint};
    use crate::price_store::HistoricalPriceStore;
    use chrono::Duration;

    fn strategy() -> OptimizedStrategy {
        OptimizedStrategy::new(
            OptimizerConfig::default(),
            None,
            None,
            AiConsensusConfig::default(),
        )
    }

    #[test]
    fn single_priced_ticker_holds_cash() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut data = MarketData::new("SPY");
        data.insert_series("AAA", vec![PricePoint { date: day, close: 10.0 }]);
        let tickers = vec!["AAA".to_string(), "GONE".to_string()];
        let store = HistoricalPriceStore::load(&data, &tickers, day, day);
        let ctx = StrategyContext {
            prices: &store,
            fundamentals: &data,
        };
        assert!(strategy().target_weights(&tickers, day, &ctx).is_empty());
    }

    #[test]
    fn candidates_pick_up_history_and_fundamentals() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let mut data = MarketData::new("SPY");
        let steady: Vec<PricePoint> = (0..300)
            .map(|d| PricePoint {
                date: start + Duration::days(d),
                close: 100.0 + (d % 5) as f64,
            })
            .collect();
        data.insert_series("AAA", steady);
        data.insert_series(
            "BBB",
            vec![PricePoint {
                date: start,
                close: 20.0,
            }],
        );
        data.insert_fundamentals(
            "AAA",
            Fundamentals {
                beta: Some(1.4),
                sector: Some("Energy".to_string()),
                ..Fundamentals::default()
            },
        );
        let tickers = data.tickers();
        let end = start + Duration::days(299);
        let store = HistoricalPriceStore::load(&data, &tickers, start, end);
        let ctx = StrategyContext {
            prices: &store,
            fundamentals: &data,
        };

        let candidates = build_candidates(&tickers, end, &ctx, &BTreeMap::new(), 0.04);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].historical.is_some());
        assert_eq!(candidates[0].beta, Some(1.4));
        assert_eq!(candidates[0].sector.as_deref(), Some("Energy"));
        assert!(candidates[1].historical.is_none());
        assert_eq!(candidates[1].signal, SignalDirection::Neutral);

        let weights = strategy().target_weights(&tickers, end, &ctx);
        let total: f64 = weights.values().sum();
        assert!(total <= 1.0 + 1e-9);
        assert_eq!(weights.len(), 2);
    }
}
