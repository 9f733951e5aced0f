use crate::errors::DataGap;
use crate::models::{PricePoint, TargetAllocation};
use crate::param_utils::{get_param_f64_clamped, get_param_usize_at_least, StrategyParams};
use crate::strategy::{normalize_weights, StrategyContext, StrategySignalProvider};
use chrono::NaiveDate;
use log::debug;
use std::collections::BTreeMap;

/// Trailing-return momentum: `short_weight * r(short) + long_weight * r(long)`,
/// floored at `-momentum_floor` and shifted positive before normalizing.
pub struct MomentumStrategy {
    name: String,
    short_lookback: usize,
    long_lookback: usize,
    short_weight: f64,
    long_weight: f64,
    min_history: usize,
    momentum_floor: f64,
}

impl MomentumStrategy {
    pub fn new(parameters: StrategyParams) -> Self {
        let short_lookback = get_param_usize_at_least(&parameters, "shortLookback", 63, 1);
        let long_lookback =
            get_param_usize_at_least(&parameters, "longLookback", 126, short_lookback);
        Self {
            name: "momentum".to_string(),
            short_lookback,
            long_lookback,
            short_weight: get_param_f64_clamped(&parameters, "shortWeight", 0.6, 0.0, 1.0),
            long_weight: get_param_f64_clamped(&parameters, "longWeight", 0.4, 0.0, 1.0),
            min_history: get_param_usize_at_least(&parameters, "minHistory", 60, 2),
            momentum_floor: get_param_f64_clamped(&parameters, "momentumFloor", 0.1, 0.0, 1.0),
        }
    }

    /// Composite momentum from the latest point. Lookbacks longer than the
    /// available history fall back to the earliest point.
    pub fn momentum_score(&self, ticker: &str, history: &[PricePoint]) -> Result<f64, DataGap> {
        if history.len() < self.min_history {
            return Err(DataGap::InsufficientHistory {
                ticker: ticker.to_string(),
                available: history.len(),
                required: self.min_history,
            });
        }
        let last = history.len() - 1;
        let current = history[last].close;
        let trailing_return = |lookback: usize| {
            let base = history[last.saturating_sub(lookback)].close;
            (current - base) / base
        };
        Ok(trailing_return(self.short_lookback) * self.short_weight
            + trailing_return(self.long_lookback) * self.long_weight)
    }
}

impl StrategySignalProvider for MomentumStrategy {
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
            let history = ctx.prices.history_until(ticker, date);
            match self.momentum_score(ticker, history) {
                Ok(momentum) => {
                    scores.insert(ticker.clone(), (momentum + self.momentum_floor).max(0.0));
                }
                Err(gap) => debug!("{}: skipped on {}: {}", ticker, date, gap),
            }
        }
        normalize_weights(scores)
    }

    fn warmup_days(&self) -> i64 {
        // Trading days to calendar days, plus slack for holidays.
        (self.long_lookback as i64 * 7) / 5 + 14
    }
}
