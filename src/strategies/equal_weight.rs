use crate::models::TargetAllocation;
use crate::strategy::{StrategyContext, StrategySignalProvider};
use chrono::NaiveDate;

/// 1/N across every ticker that has a price on the rebalance date.
pub struct EqualWeightStrategy {
    name: String,
}

impl EqualWeightStrategy {
    pub fn new() -> Self {
        Self {
            name: "equal_weight".to_string(),
        }
    }
}

impl Default for EqualWeightStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategySignalProvider for EqualWeightStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_weights(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> TargetAllocation {
        let tradable: Vec<&String> = tickers
            .iter()
            .filter(|ticker| ctx.prices.price_on(ticker, date).is_some())
            .collect();
        if tradable.is_empty() {
            return TargetAllocation::new();
        }
        let weight = 1.0 / tradable.len() as f64;
        tradable
            .into_iter()
            .map(|ticker| (ticker.clone(), weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_context::MarketData;
    use crate::models::PricePoint;
    use crate::price_store::HistoricalPriceStore;

    #[test]
    fn splits_evenly_across_priced_tickers() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut data = MarketData::new("SPY");
        for ticker in ["AAA", "BBB", "CCC", "DDD"] {
            data.insert_series(ticker, vec![PricePoint { date: day, close: 10.0 }]);
        }
        let mut tickers = data.tickers();
        tickers.push("NOPE".to_string());
        let store = HistoricalPriceStore::load(&data, &tickers, day, day);
        let ctx = StrategyContext {
            prices: &store,
            fundamentals: &data,
        };

        let weights = EqualWeightStrategy::new().target_weights(&tickers, day, &ctx);
        assert_eq!(weights.len(), 4);
        assert!(weights.values().all(|w| (w - 0.25).abs() < 1e-12));
        assert!(!weights.contains_key("NOPE"));
    }
}
