use crate::models::{Fundamentals, TargetAllocation};
use crate::param_utils::{get_param_f64, get_param_f64_clamped, StrategyParams};
use crate::strategy::{normalize_weights, StrategyContext, StrategySignalProvider};
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;

/// Cheapness score from P/E and P/B. Missing ratios are replaced by
/// unattractive defaults so the ticker is disfavored but still held.
pub struct ValueStrategy {
    name: String,
    default_pe: f64,
    default_pb: f64,
    fallback_weight: f64,
}

impl ValueStrategy {
    pub fn new(parameters: StrategyParams) -> Self {
        Self {
            name: "value".to_string(),
            default_pe: get_param_f64(&parameters, "defaultPe", 100.0),
            default_pb: get_param_f64(&parameters, "defaultPb", 10.0),
            fallback_weight: get_param_f64_clamped(&parameters, "fallbackWeight", 0.05, 0.0, 1.0),
        }
    }

    pub fn value_score(&self, fundamentals: &Fundamentals) -> f64 {
        let ratio = |value: Option<f64>, default: f64| {
            value
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(default)
        };
        let pe = ratio(fundamentals.pe_ratio, self.default_pe);
        let pb = ratio(fundamentals.pb_ratio, self.default_pb);
        0.5 / (pe + 1.0) + 0.5 / (pb + 1.0)
    }
}

impl StrategySignalProvider for ValueStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_weights(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> TargetAllocation {
        let mut scores = BTreeMap::new();
        for ticker in tickers {
            if ctx.prices.price_on(ticker, date).is_none() {
                continue;
            }
            let score = match ctx.fundamentals.snapshot(ticker, date) {
                Ok(fundamentals) => self.value_score(&fundamentals),
                Err(gap) => {
                    warn!("{}: {}; using neutral weight", ticker, gap);
                    self.fallback_weight
                }
            };
            scores.insert(ticker.clone(), score);
        }
        normalize_weights(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_context::{FundamentalsProvider, MarketData};
    use crate::errors::DataGap;
    use crate::models::PricePoint;
    use crate::price_store::HistoricalPriceStore;

    struct FlakyFundamentals;

    impl FundamentalsProvider for FlakyFundamentals {
        fn snapshot(&self, ticker: &str, _date: NaiveDate) -> Result<Fundamentals, DataGap> {
            match ticker {
                "CHEAP" => Ok(Fundamentals {
                    pe_ratio: Some(9.0),
                    pb_ratio: Some(1.0),
                    ..Fundamentals::default()
                }),
                "BROKEN" => Err(DataGap::MissingFundamentals {
                    ticker: ticker.to_string(),
                    reason: "timeout".to_string(),
                }),
                _ => Ok(Fundamentals::default()),
            }
        }
    }

    #[test]
    fn missing_and_negative_ratios_use_worst_case_defaults() {
        let strategy = ValueStrategy::new(StrategyParams::new());
        let worst = 0.5 / 101.0 + 0.5 / 11.0;
        assert!((strategy.value_score(&Fundamentals::default()) - worst).abs() < 1e-12);
        let negative = Fundamentals {
            pe_ratio: Some(-4.0),
            pb_ratio: Some(0.0),
            ..Fundamentals::default()
        };
        assert!((strategy.value_score(&negative) - worst).abs() < 1e-12);
    }

    #[test]
    fn fetch_failure_gets_neutral_weight_not_exclusion() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut data = MarketData::new("SPY");
        for ticker in ["CHEAP", "PRICEY", "BROKEN"] {
            data.insert_series(ticker, vec![PricePoint { date: day, close: 10.0 }]);
        }
        let tickers = data.tickers();
        let store = HistoricalPriceStore::load(&data, &tickers, day, day);
        let ctx = StrategyContext {
            prices: &store,
            fundamentals: &FlakyFundamentals,
        };

        let weights = ValueStrategy::new(StrategyParams::new()).target_weights(&tickers, day, &ctx);
        let cheap = 0.5 / 10.0 + 0.5 / 2.0;
        let pricey = 0.5 / 101.0 + 0.5 / 11.0;
        let total = cheap + pricey + 0.05;
        assert!((weights["CHEAP"] - cheap / total).abs() < 1e-12);
        assert!((weights["PRICEY"] - pricey / total).abs() < 1e-12);
        assert!((weights["BROKEN"] - 0.05 / total).abs() < 1e-12);
    }

    #[test]
    fn fallback_weight_is_clamped_to_unit_range() {
        let mut params = StrategyParams::new();
        params.insert("fallbackWeight".to_string(), -1.0);
        assert_eq!(ValueStrategy::new(params).fallback_weight, 0.0);

        let mut params = StrategyParams::new();
        params.insert("fallbackWeight".to_string(), 7.5);
        assert_eq!(ValueStrategy::new(params).fallback_weight, 1.0);
    }
}
