use crate::config::AiConsensusConfig;
use crate::models::{ConsensusSignal, SignalDirection, TargetAllocation};
use crate::param_utils::{get_param_f64, get_param_usize_at_least, StrategyParams};
use crate::signals::{evaluate_ticker, AsOfData, SignalEnsemble};
use crate::strategy::{normalize_weights, StrategyContext, StrategySignalProvider};
use chrono::NaiveDate;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Trailing points handed to personas by default (about one trading year).
pub const DEFAULT_HISTORY_WINDOW: usize = 252;

/// Builds what a persona sees for `ticker` on `date`; `None` when the ticker
/// has no price yet.
pub fn as_of_data(
    ctx: &StrategyContext<'_>,
    ticker: &str,
    date: NaiveDate,
    history_window: usize,
) -> Option<AsOfData> {
    let history = ctx.prices.history_until(ticker, date);
    if history.is_empty() {
        return None;
    }
    let from = history.len().saturating_sub(history_window);
    Some(AsOfData {
        ticker: ticker.to_string(),
        date,
        history: history[from..].to_vec(),
        fundamentals: ctx.fundamentals.snapshot(ticker, date).ok(),
    })
}

/// Runs the persona fan-out for every priced ticker, one ticker at a time.
/// Must be called from outside the runtime's worker threads.
pub fn gather_consensus(
    ensemble: &Arc<dyn SignalEnsemble>,
    runtime: &Handle,
    config: &AiConsensusConfig,
    tickers: &[String],
    date: NaiveDate,
    ctx: &StrategyContext<'_>,
    history_window: usize,
) -> Vec<ConsensusSignal> {
    let requests: Vec<AsOfData> = tickers
        .iter()
        .filter_map(|ticker| as_of_data(ctx, ticker, date, history_window))
        .collect();
    runtime.block_on(async {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(evaluate_ticker(Arc::clone(ensemble), request, config).await);
        }
        results
    })
}

/// Persona-ensemble strategy: bullish names get 15-25%, neutral 5%, bearish
/// nothing, then the non-zero weights are normalized.
pub struct AiConsensusStrategy {
    name: String,
    ensemble: Arc<dyn SignalEnsemble>,
    runtime: Handle,
    config: AiConsensusConfig,
    history_window: usize,
    neutral_weight: f64,
    bullish_base: f64,
    bullish_span: f64,
    bullish_cap: f64,
}

impl AiConsensusStrategy {
    pub fn new(
        ensemble: Arc<dyn SignalEnsemble>,
        runtime: Handle,
        config: AiConsensusConfig,
        parameters: StrategyParams,
    ) -> Self {
        Self {
            name: "ai_consensus".to_string(),
            ensemble,
            runtime,
            config,
            history_window: get_param_usize_at_least(
                &parameters,
                "historyWindow",
                DEFAULT_HISTORY_WINDOW,
                1,
            ),
            neutral_weight: get_param_f64(&parameters, "neutralWeight", 0.05),
            bullish_base: get_param_f64(&parameters, "bullishBase", 0.15),
            bullish_span: get_param_f64(&parameters, "bullishSpan", 0.10),
            bullish_cap: get_param_f64(&parameters, "bullishCap", 0.25),
        }
    }

    pub fn consensus_weight(&self, consensus: &ConsensusSignal) -> f64 {
        match consensus.signal {
            SignalDirection::Bullish => (self.bullish_base
                + consensus.confidence / 100.0 * self.bullish_span)
                .min(self.bullish_cap),
            SignalDirection::Neutral => self.neutral_weight,
            SignalDirection::Bearish => 0.0,
        }
    }
}

impl StrategySignalProvider for AiConsensusStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_weights(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> TargetAllocation {
        let consensus = gather_consensus(
            &self.ensemble,
            &self.runtime,
            &self.config,
            tickers,
            date,
            ctx,
            self.history_window,
        );
        let scores: BTreeMap<String, f64> = consensus
            .iter()
            .map(|signal| (signal.ticker.clone(), self.consensus_weight(signal)))
            .collect();
        info!(
            "AI consensus on {}: {} bullish, {} bearish of {}",
            date,
            consensus
                .iter()
                .filter(|s| s.signal == SignalDirection::Bullish)
                .count(),
            consensus
                .iter()
                .filter(|s| s.signal == SignalDirection::Bearish)
                .count(),
            consensus.len()
        );
        normalize_weights(scores)
    }
}
