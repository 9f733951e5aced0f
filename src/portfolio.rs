use crate::errors::EngineError;
use crate::models::{PortfolioSnapshot, PositionDetail, Trade, TradeAction};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Float slack tolerated when a debit exactly exhausts cash.
pub const CASH_EPSILON: f64 = 1e-6;

/// Cash plus share holdings for one backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    cash: f64,
    positions: BTreeMap<String, f64>,
}

impl PortfolioState {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash.max(0.0),
            positions: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, f64> {
        &self.positions
    }

    pub fn shares_of(&self, ticker: &str) -> f64 {
        self.positions.get(ticker).copied().unwrap_or(0.0)
    }

    pub fn held_tickers(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Cash plus marked positions; tickers without a price are skipped.
    pub fn value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.cash
            + self
                .positions
                .iter()
                .filter_map(|(ticker, shares)| prices.get(ticker).map(|price| shares * price))
                .sum::<f64>()
    }

    /// Applies a trade. A buy that costs more than the available cash is
    /// rejected before anything is mutated.
    pub fn apply(&mut self, trade: &Trade) -> Result<(), EngineError> {
        match trade.action() {
            TradeAction::Buy => {
                let required = trade.value() + trade.commission();
                if required > self.cash + CASH_EPSILON {
                    return Err(EngineError::CashConstraintViolation {
                        required,
                        available: self.cash,
                    });
                }
                self.cash = (self.cash - required).max(0.0);
                *self
                    .positions
                    .entry(trade.ticker().to_string())
                    .or_insert(0.0) += trade.shares();
            }
            TradeAction::Sell => {
                let held = self.shares_of(trade.ticker());
                let remaining = held - trade.shares();
                self.cash += trade.cash_delta();
                if remaining <= CASH_EPSILON {
                    self.positions.remove(trade.ticker());
                } else {
                    self.positions.insert(trade.ticker().to_string(), remaining);
                }
            }
        }
        Ok(())
    }

    /// Removes a residual position outright (dust cleanup).
    pub fn drop_position(&mut self, ticker: &str) {
        self.positions.remove(ticker);
    }

    pub fn snapshot(
        &self,
        date: NaiveDate,
        prices: &BTreeMap<String, f64>,
        initial_capital: f64,
        benchmark_value: f64,
    ) -> PortfolioSnapshot {
        let positions: BTreeMap<String, PositionDetail> = self
            .positions
            .iter()
            .filter_map(|(ticker, shares)| {
                prices.get(ticker).map(|price| {
                    (
                        ticker.clone(),
                        PositionDetail {
                            shares: *shares,
                            value: shares * price,
                        },
                    )
                })
            })
            .collect();
        let total_value = self.value(prices);
        let relative = |value: f64| {
            if initial_capital > 0.0 {
                (value - initial_capital) / initial_capital
            } else {
                0.0
            }
        };

        PortfolioSnapshot {
            date,
            cash: self.cash,
            positions,
            total_value,
            cumulative_return: relative(total_value),
            benchmark_value,
            benchmark_return: relative(benchmark_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn prices(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn buy_then_sell_moves_cash_and_shares() {
        let mut state = PortfolioState::new(1_000.0);
        let buy = Trade::new(date(), "AAA", TradeAction::Buy, 5.0, 100.0, 1.0, "test");
        state.apply(&buy).unwrap();
        assert!((state.cash() - 499.0).abs() < 1e-9);
        assert!((state.shares_of("AAA") - 5.0).abs() < 1e-12);

        let sell = Trade::new(date(), "AAA", TradeAction::Sell, 2.0, 110.0, 0.5, "test");
        state.apply(&sell).unwrap();
        assert!((state.cash() - (499.0 + 220.0 - 0.5)).abs() < 1e-9);
        assert!((state.shares_of("AAA") - 3.0).abs() < 1e-12);
    }

    #[test]
    fn overdrawing_buy_is_rejected_without_mutation() {
        let mut state = PortfolioState::new(100.0);
        let buy = Trade::new(date(), "AAA", TradeAction::Buy, 1.0, 100.0, 0.1, "test");
        let err = state.apply(&buy).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CashConstraintViolation { required, available }
                if (required - 100.1).abs() < 1e-9 && (available - 100.0).abs() < 1e-9
        ));
        assert_eq!(state, PortfolioState::new(100.0));
    }

    #[test]
    fn exact_spend_leaves_zero_cash() {
        let mut state = PortfolioState::new(10_000.0);
        let buy = Trade::new(date(), "AAA", TradeAction::Buy, 100.0, 100.0, 0.0, "test");
        state.apply(&buy).unwrap();
        assert_eq!(state.cash(), 0.0);
    }

    #[test]
    fn full_sell_removes_position() {
        let mut state = PortfolioState::new(1_000.0);
        state
            .apply(&Trade::new(date(), "AAA", TradeAction::Buy, 4.0, 50.0, 0.0, "t"))
            .unwrap();
        state
            .apply(&Trade::new(date(), "AAA", TradeAction::Sell, 4.0, 60.0, 0.0, "t"))
            .unwrap();
        assert!(state.positions().is_empty());
        assert!((state.cash() - 1_040.0).abs() < 1e-9);
    }

    #[test]
    fn value_skips_unpriced_positions() {
        let mut state = PortfolioState::new(1_000.0);
        state
            .apply(&Trade::new(date(), "AAA", TradeAction::Buy, 2.0, 100.0, 0.0, "t"))
            .unwrap();
        state
            .apply(&Trade::new(date(), "BBB", TradeAction::Buy, 1.0, 300.0, 0.0, "t"))
            .unwrap();
        let value = state.value(&prices(&[("AAA", 150.0)]));
        assert!((value - (500.0 + 300.0)).abs() < 1e-9);
    }

    #[test]
    fn snapshot_conserves_value() {
        let mut state = PortfolioState::new(1_000.0);
        state
            .apply(&Trade::new(date(), "AAA", TradeAction::Buy, 3.0, 100.0, 1.0, "t"))
            .unwrap();
        let marks = prices(&[("AAA", 120.0)]);
        let snapshot = state.snapshot(date(), &marks, 1_000.0, 1_050.0);
        let positions_value: f64 = snapshot.positions.values().map(|p| p.value).sum();
        assert!((snapshot.total_value - (snapshot.cash + positions_value)).abs() < 1e-9);
        assert!((snapshot.cumulative_return - 0.059).abs() < 1e-9);
        assert!((snapshot.benchmark_return - 0.05).abs() < 1e-9);
    }
}
