use crate::commands::build_portfolio::gather_candidates;
use crate::context::AppContext;
use crate::models::{PortfolioAnalysis, SignalDirection};
use crate::optimizer::{AssetCandidate, PortfolioOptimizer};
use crate::ticker_utils::parse_holdings;
use anyhow::Result;
use chrono::NaiveDate;
use log::{info, warn};

/// Risk and concentration report for holdings given as `TICKER:WEIGHT,...`.
pub async fn run(
    ctx: &AppContext,
    holdings: &str,
    as_of: Option<NaiveDate>,
) -> Result<PortfolioAnalysis> {
    let config = ctx.optimizer_config()?;
    let holdings = parse_holdings(holdings)?;
    let tickers: Vec<String> = holdings.keys().cloned().collect();
    let (date, candidates) =
        gather_candidates(ctx, &tickers, as_of, config.risk_free_rate).await?;

    let mut weighted = Vec::with_capacity(holdings.len());
    for (ticker, weight) in holdings {
        let candidate = match candidates.iter().find(|c| c.ticker == ticker) {
            Some(candidate) => candidate.clone(),
            None => {
                warn!("{} has no price data as of {}; using default estimates", ticker, date);
                AssetCandidate {
                    ticker,
                    signal: SignalDirection::Neutral,
                    confidence: 50.0,
                    beta: None,
                    sector: None,
                    historical: None,
                }
            }
        };
        weighted.push((candidate, weight));
    }

    info!("Analyzing {} holdings as of {}", weighted.len(), date);
    Ok(PortfolioOptimizer::new(config).analyze_existing(weighted))
}
