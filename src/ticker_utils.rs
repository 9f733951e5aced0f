use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashSet};

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Splits a comma or whitespace separated ticker list, keeping first-seen order.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(normalize_ticker_symbol)
        .filter(|ticker| seen.insert(ticker.clone()))
        .collect()
}

/// Parses `TICKER:WEIGHT` holdings. When any entry lacks a weight, every ticker
/// gets an equal share instead.
pub fn parse_holdings(raw: &str) -> Result<BTreeMap<String, f64>> {
    let entries: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    if entries.is_empty() {
        return Err(anyhow!("No holdings supplied"));
    }

    if entries.iter().any(|entry| !entry.contains(':')) {
        let tickers = parse_ticker_list(
            &entries
                .iter()
                .map(|entry| entry.split(':').next().unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        );
        let equal_weight = 1.0 / tickers.len() as f64;
        return Ok(tickers
            .into_iter()
            .map(|ticker| (ticker, equal_weight))
            .collect());
    }

    let mut holdings = BTreeMap::new();
    for entry in entries {
        let (ticker, weight) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("Holding {} must look like TICKER:WEIGHT", entry))?;
        let ticker = normalize_ticker_symbol(ticker)
            .ok_or_else(|| anyhow!("Holding {} has an empty ticker", entry))?;
        let weight = weight
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("Holding {} has a non-numeric weight", entry))?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(anyhow!("Holding {} must have a non-negative weight", entry));
        }
        holdings.insert(ticker, weight);
    }
    Ok(holdings)
}
