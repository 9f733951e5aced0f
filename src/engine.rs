use crate::config::BacktestConfig;
use crate::data_context::{FundamentalsProvider, PriceProvider};
use crate::errors::EngineError;
use crate::execution::TradeExecutionEngine;
use crate::models::{BacktestResult, PortfolioSnapshot, Trade};
use crate::performance::PerformanceAnalyzer;
use crate::portfolio::PortfolioState;
use crate::price_store::HistoricalPriceStore;
use crate::scheduler::schedule;
use crate::strategy::{StrategyContext, StrategySignalProvider};
use chrono::{Duration, NaiveDate};
use log::{debug, info};

/// Walks the business-day schedule, rebalancing a single portfolio on
/// trigger dates and recording one snapshot per date.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Fetches prices (including the strategy's warmup window) and runs the
    /// simulation over `[start, end]`.
    pub fn run(
        &self,
        strategy: &dyn StrategySignalProvider,
        prices: &dyn PriceProvider,
        fundamentals: &dyn FundamentalsProvider,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestResult, EngineError> {
        let fetch_start = start - Duration::days(strategy.warmup_days().max(0));
        let mut store = HistoricalPriceStore::load(prices, tickers, fetch_start, end);
        match prices.history(&self.config.benchmark_ticker, fetch_start, end) {
            Ok(points) if !points.is_empty() => store.replace_benchmark(points),
            Ok(_) => debug!(
                "Benchmark {} has no points in range; keeping provider default",
                self.config.benchmark_ticker
            ),
            Err(gap) => debug!(
                "Benchmark {} unavailable ({}); keeping provider default",
                self.config.benchmark_ticker, gap
            ),
        }
        self.run_with_store(strategy, &store, fundamentals, tickers, start, end)
    }

    pub fn run_with_store(
        &self,
        strategy: &dyn StrategySignalProvider,
        store: &HistoricalPriceStore,
        fundamentals: &dyn FundamentalsProvider,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BacktestResult, EngineError> {
        if store.is_empty() {
            return Err(EngineError::EmptyResultSet { start, end });
        }

        let dates = schedule(start, end, self.config.rebalance_frequency);
        info!(
            "Backtesting {} over {} tickers from {} to {} ({} dates, {} rebalancing)",
            strategy.name(),
            tickers.len(),
            start,
            end,
            dates.len(),
            self.config.rebalance_frequency.label()
        );

        let executor = TradeExecutionEngine::from_config(&self.config);
        let ctx = StrategyContext {
            prices: store,
            fundamentals,
        };
        let tradable = store.tickers();
        let initial_capital = self.config.initial_capital;
        let mut state = PortfolioState::new(initial_capital);
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<PortfolioSnapshot> = Vec::with_capacity(dates.len());
        let mut benchmark_base: Option<f64> = None;

        for entry in &dates {
            let prices = store.prices_on(&tradable, entry.date);

            let benchmark_value = match store.benchmark_on(entry.date) {
                Some(level) => {
                    let base = *benchmark_base.get_or_insert(level);
                    initial_capital * level / base
                }
                None => {
                    debug!("No benchmark level on {}", entry.date);
                    initial_capital
                }
            };
            // Marked before trading: a rebalance shows up from the next date on.
            equity_curve.push(state.snapshot(
                entry.date,
                &prices,
                initial_capital,
                benchmark_value,
            ));

            if entry.rebalance {
                let target = strategy.target_weights(tickers, entry.date, &ctx);
                let executed = executor.rebalance(&target, &prices, &mut state, entry.date);
                info!(
                    "Rebalanced on {}: {} targets, {} trades, cash {:.2}",
                    entry.date,
                    target.len(),
                    executed.len(),
                    state.cash()
                );
                trades.extend(executed);
            }
        }

        let result = PerformanceAnalyzer::new(self.config.risk_free_rate).analyze(
            strategy.name(),
            initial_capital,
            start,
            end,
            equity_curve,
            trades,
        )?;

        info!(
            "{}: final value {:.2} ({:+.2}%), Sharpe {:.2}, max drawdown {:.2}%, {} trades",
            result.strategy_name,
            result.final_value,
            result.total_return * 100.0,
            result.sharpe_ratio,
            result.max_drawdown * 100.0,
            result.num_trades
        );
        Ok(result)
    }
}
