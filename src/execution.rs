use crate::config::BacktestConfig;
use crate::models::{TargetAllocation, Trade, TradeAction};
use crate::portfolio::{PortfolioState, CASH_EPSILON};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::BTreeMap;

const EXIT_REASON: &str = "Not in target allocation";
const SELL_REASON: &str = "Rebalancing";

/// Turns a target allocation into executed trade legs against a portfolio.
#[derive(Debug, Clone)]
pub struct TradeExecutionEngine {
    commission_rate: f64,
    materiality_threshold: f64,
    dust_threshold: f64,
}

impl TradeExecutionEngine {
    pub fn new(commission_rate: f64, materiality_threshold: f64, dust_threshold: f64) -> Self {
        Self {
            commission_rate,
            materiality_threshold,
            dust_threshold,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(
            config.commission_rate,
            config.materiality_threshold,
            config.dust_threshold,
        )
    }

    /// Exits held tickers missing from the target, then sells overweight
    /// positions, then buys underweight ones. Every leg that executes is applied
    /// to `state` and returned in execution order.
    pub fn rebalance(
        &self,
        target: &TargetAllocation,
        prices: &BTreeMap<String, f64>,
        state: &mut PortfolioState,
        date: NaiveDate,
    ) -> Vec<Trade> {
        let total_value = state.value(prices);
        if total_value <= 0.0 {
            return Vec::new();
        }
        let target = clean_target(target, prices);
        let min_trade_value = self.materiality_threshold * total_value;
        let mut trades = Vec::new();

        for ticker in state.held_tickers() {
            if target.contains_key(&ticker) {
                continue;
            }
            let Some(&price) = prices.get(&ticker) else {
                debug!("{}: no price on {}, exit deferred", ticker, date);
                continue;
            };
            let shares = state.shares_of(&ticker);
            self.execute(
                state,
                &mut trades,
                self.sell_leg(date, &ticker, shares, price, EXIT_REASON),
            );
        }

        let mut buys: Vec<(String, f64, f64)> = Vec::new();
        for (ticker, weight) in &target {
            let price = prices[ticker];
            let current_value = state.shares_of(ticker) * price;
            let delta = total_value * weight - current_value;
            if delta.abs() < min_trade_value {
                continue;
            }
            if delta > 0.0 {
                buys.push((ticker.clone(), delta, *weight));
                continue;
            }

            let held = state.shares_of(ticker);
            let mut shares = held.min(delta.abs() / price);
            if held - shares < self.dust_threshold {
                shares = held;
            }
            if shares <= 0.0 {
                continue;
            }
            self.execute(
                state,
                &mut trades,
                self.sell_leg(date, ticker, shares, price, SELL_REASON),
            );
        }

        for (ticker, delta, weight) in buys {
            let price = prices[&ticker];
            let reason = format!("Target weight {:.1}%", weight * 100.0);
            let cash = state.cash();
            let commission = delta * self.commission_rate;

            let (gross, reason) = if delta + commission <= cash + CASH_EPSILON {
                (delta, reason)
            } else {
                let affordable = cash / (1.0 + self.commission_rate);
                if affordable < min_trade_value {
                    warn!(
                        "{}: skipping buy on {}, requires {:.2} cash but only {:.2} is available",
                        ticker,
                        date,
                        delta + commission,
                        cash
                    );
                    continue;
                }
                (affordable, format!("{} (cash-limited)", reason))
            };

            let trade = Trade::new(
                date,
                &ticker,
                TradeAction::Buy,
                gross / price,
                price,
                gross * self.commission_rate,
                reason,
            );
            self.execute(state, &mut trades, trade);
        }

        trades
    }

    fn sell_leg(
        &self,
        date: NaiveDate,
        ticker: &str,
        shares: f64,
        price: f64,
        reason: &str,
    ) -> Trade {
        let proceeds = shares * price;
        Trade::new(
            date,
            ticker,
            TradeAction::Sell,
            shares,
            price,
            proceeds * self.commission_rate,
            reason,
        )
    }

    fn execute(&self, state: &mut PortfolioState, trades: &mut Vec<Trade>, trade: Trade) {
        match state.apply(&trade) {
            Ok(()) => {
                if trade.action() == TradeAction::Sell
                    && state.shares_of(trade.ticker()) < self.dust_threshold
                {
                    state.drop_position(trade.ticker());
                }
                trades.push(trade);
            }
            Err(err) => warn!(
                "{}: {} leg skipped on {}: {}",
                trade.ticker(),
                trade.action(),
                trade.date(),
                err
            ),
        }
    }
}

/// Keeps positive, finite weights for priced tickers. Weights summing above 1
/// are scaled down; a smaller sum leaves the residual in cash.
pub fn clean_target(target: &TargetAllocation, prices: &BTreeMap<String, f64>) -> TargetAllocation {
    let mut cleaned: TargetAllocation = target
        .iter()
        .filter(|(ticker, weight)| {
            weight.is_finite() && **weight > 0.0 && prices.contains_key(ticker.as_str())
        })
        .map(|(ticker, weight)| (ticker.clone(), *weight))
        .collect();

    let total: f64 = cleaned.values().sum();
    if total > 1.0 {
        for weight in cleaned.values_mut() {
            *weight /= total;
        }
    }
    cleaned
}
