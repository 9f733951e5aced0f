use crate::commands::output::write_json;
use crate::context::AppContext;
use crate::engine::BacktestEngine;
use crate::models::BacktestResult;
use crate::param_utils::parse_param_overrides;
use crate::strategy::{create_strategy, StrategyDeps, StrategyKind};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

pub struct BacktestArgs {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub strategy: String,
    pub params: Vec<String>,
    pub output: Option<PathBuf>,
}

pub async fn run(ctx: Arc<AppContext>, args: BacktestArgs) -> Result<BacktestResult> {
    if args.start > args.end {
        return Err(anyhow!(
            "Start date {} is after end date {}",
            args.start,
            args.end
        ));
    }

    let kind = StrategyKind::parse(&args.strategy)?;
    let params = parse_param_overrides(&args.params)?;
    let config = ctx.backtest_config()?;

    // The optimized variant only consults the ensemble when signals were recorded.
    let ensemble = match kind {
        StrategyKind::AiConsensus => Some(ctx.recorded_ensemble()),
        StrategyKind::Optimized if ctx.has_recorded_signals() => Some(ctx.recorded_ensemble()),
        _ => None,
    };
    let deps = StrategyDeps {
        ensemble,
        runtime: Some(Handle::current()),
        ai_config: ctx.ai_config()?,
        optimizer_config: ctx.optimizer_config()?,
    };
    let strategy = create_strategy(kind, params, deps)?;
    let engine = BacktestEngine::new(config)?;
    let tickers = ctx.resolve_tickers(&args.tickers);
    if tickers.is_empty() {
        return Err(anyhow!("No tickers to backtest"));
    }

    info!(
        "Running {} backtest on {} tickers ({} to {})",
        kind.label(),
        tickers.len(),
        args.start,
        args.end
    );

    let worker_ctx = Arc::clone(&ctx);
    let (start, end) = (args.start, args.end);
    let result = tokio::task::spawn_blocking(move || {
        let data = worker_ctx.market_data();
        engine.run(strategy.as_ref(), data, data, &tickers, start, end)
    })
    .await
    .context("Backtest worker terminated unexpectedly")??;

    write_json(&result, args.output.as_deref())?;
    if let Some(path) = &args.output {
        info!("Wrote backtest result to {}", path.display());
    }
    Ok(result)
}
