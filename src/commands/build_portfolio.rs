use crate::context::AppContext;
use crate::models::{ConsensusSignal, PortfolioAnalysis};
use crate::optimizer::{AssetCandidate, PortfolioOptimizer};
use crate::price_store::HistoricalPriceStore;
use crate::signals::evaluate_ticker;
use crate::strategy::ai_consensus::{as_of_data, DEFAULT_HISTORY_WINDOW};
use crate::strategy::optimized::build_candidates;
use crate::strategy::StrategyContext;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds an optimized allocation for `tickers` as of `as_of` (latest
/// snapshot date when absent).
pub async fn run(
    ctx: &AppContext,
    tickers: &[String],
    as_of: Option<NaiveDate>,
) -> Result<PortfolioAnalysis> {
    let config = ctx.optimizer_config()?;
    let tickers = ctx.resolve_tickers(tickers);
    let (date, candidates) = gather_candidates(ctx, &tickers, as_of, config.risk_free_rate).await?;
    info!(
        "Optimizing {} candidates as of {} ({} profile)",
        candidates.len(),
        date,
        config.risk_profile.label()
    );
    Ok(PortfolioOptimizer::new(config).build_portfolio(candidates)?)
}

/// Candidates for every priced ticker, with recorded ensemble signals when
/// the snapshot has any.
pub(crate) async fn gather_candidates(
    ctx: &AppContext,
    tickers: &[String],
    as_of: Option<NaiveDate>,
    risk_free_rate: f64,
) -> Result<(NaiveDate, Vec<AssetCandidate>)> {
    let ai_config = ctx.ai_config()?;
    let data = ctx.market_data();
    let store = HistoricalPriceStore::load(
        data,
        tickers,
        NaiveDate::MIN,
        as_of.unwrap_or(NaiveDate::MAX),
    );
    let date = match as_of.or_else(|| latest_date(&store)) {
        Some(date) => date,
        None => return Err(anyhow!("No price data for the requested tickers")),
    };
    let strategy_ctx = StrategyContext {
        prices: &store,
        fundamentals: data,
    };

    let mut consensus: BTreeMap<String, ConsensusSignal> = BTreeMap::new();
    if ctx.has_recorded_signals() {
        let ensemble = ctx.recorded_ensemble();
        for ticker in tickers {
            let Some(request) = as_of_data(&strategy_ctx, ticker, date, DEFAULT_HISTORY_WINDOW)
            else {
                continue;
            };
            let signal = evaluate_ticker(Arc::clone(&ensemble), request, &ai_config).await;
            consensus.insert(ticker.clone(), signal);
        }
    } else {
        warn!("Snapshot has no recorded persona signals; every candidate is treated as neutral");
    }

    let candidates = build_candidates(tickers, date, &strategy_ctx, &consensus, risk_free_rate);
    Ok((date, candidates))
}

fn latest_date(store: &HistoricalPriceStore) -> Option<NaiveDate> {
    store
        .tickers()
        .iter()
        .filter_map(|ticker| store.series(ticker).and_then(|points| points.last()))
        .map(|point| point.date)
        .max()
}
