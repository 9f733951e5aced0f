use crate::errors::EngineError;
use crate::models::{BacktestResult, MonthlyReturn, PortfolioSnapshot, Trade, TradeAction};
use chrono::NaiveDate;
use statrs::statistics::Statistics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Sell legs realizing at least this share of `shares * price` count as wins.
const WIN_VALUE_RATIO: f64 = 0.99;
/// Single-factor alpha assumes the portfolio moves one-for-one with the benchmark.
const ASSUMED_BETA: f64 = 1.0;

pub struct PerformanceAnalyzer {
    risk_free_rate: f64,
}

impl PerformanceAnalyzer {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    /// Reduces one run's equity curve and trade log to summary statistics.
    pub fn analyze(
        &self,
        strategy_name: &str,
        initial_capital: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        equity_curve: Vec<PortfolioSnapshot>,
        trades: Vec<Trade>,
    ) -> Result<BacktestResult, EngineError> {
        let Some(last) = equity_curve.last() else {
            return Err(EngineError::EmptyResultSet {
                start: start_date,
                end: end_date,
            });
        };
        let final_value = last.total_value;

        let values: Vec<f64> = equity_curve.iter().map(|s| s.total_value).collect();
        let returns = Self::daily_returns(&values);

        let total_return = if initial_capital > 0.0 {
            (final_value - initial_capital) / initial_capital
        } else {
            0.0
        };
        let annualized_return =
            Self::annualized_return(initial_capital, final_value, equity_curve.len());
        let volatility = Self::volatility(&returns);
        let sharpe_ratio = Self::sharpe_ratio(annualized_return, volatility, self.risk_free_rate);
        let max_drawdown = Self::max_drawdown(&values);
        let benchmark_return = Self::benchmark_return(&equity_curve);
        let alpha = annualized_return
            - (self.risk_free_rate + ASSUMED_BETA * (benchmark_return - self.risk_free_rate));
        let win_rate = Self::win_rate(&trades);
        let profit_factor = Self::profit_factor(&trades);
        let monthly_returns = Self::monthly_returns(&equity_curve, initial_capital);

        Ok(BacktestResult {
            strategy_name: strategy_name.to_string(),
            start_date,
            end_date,
            initial_capital,
            final_value,
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            max_drawdown,
            benchmark_return,
            alpha,
            beta: ASSUMED_BETA,
            win_rate,
            profit_factor,
            num_trades: trades.len(),
            trades,
            equity_curve,
            monthly_returns,
        })
    }

    pub fn daily_returns(values: &[f64]) -> Vec<f64> {
        values
            .windows(2)
            .map(|pair| {
                if pair[0] > 0.0 {
                    (pair[1] - pair[0]) / pair[0]
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// `(final / initial)^(252 / n) - 1` over `n` simulated days.
    pub fn annualized_return(initial_capital: f64, final_value: f64, days: usize) -> f64 {
        if days == 0 || initial_capital <= 0.0 || !final_value.is_finite() {
            return 0.0;
        }
        let ratio = final_value / initial_capital;
        if ratio <= 0.0 {
            return -1.0;
        }
        ratio.powf(TRADING_DAYS_PER_YEAR / days as f64) - 1.0
    }

    /// Annualized population standard deviation of daily returns.
    pub fn volatility(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std_dev = returns.to_vec().population_std_dev();
        if std_dev.is_finite() {
            std_dev * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        }
    }

    pub fn sharpe_ratio(annualized_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
        if volatility <= 0.0 || !volatility.is_finite() {
            return 0.0;
        }
        (annualized_return - risk_free_rate) / volatility
    }

    /// Most negative peak-to-trough decline of the compounded curve, in `[-1, 0]`.
    pub fn max_drawdown(values: &[f64]) -> f64 {
        let Some(&first) = values.first() else {
            return 0.0;
        };
        if first <= 0.0 {
            return 0.0;
        }

        let mut running_max = f64::NEG_INFINITY;
        let mut max_drawdown: f64 = 0.0;
        for value in values {
            let cumulative = value / first;
            running_max = running_max.max(cumulative);
            if running_max > 0.0 {
                max_drawdown = max_drawdown.min((cumulative - running_max) / running_max);
            }
        }
        max_drawdown.clamp(-1.0, 0.0)
    }

    fn benchmark_return(equity_curve: &[PortfolioSnapshot]) -> f64 {
        match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) if first.benchmark_value > 0.0 => {
                (last.benchmark_value - first.benchmark_value) / first.benchmark_value
            }
            _ => 0.0,
        }
    }

    /// Share of sell legs whose value is at least 99% of `shares * price`.
    pub fn win_rate(trades: &[Trade]) -> f64 {
        let sells: Vec<&Trade> = trades
            .iter()
            .filter(|trade| trade.action() == TradeAction::Sell)
            .collect();
        if sells.is_empty() {
            return 0.0;
        }
        let wins = sells
            .iter()
            .filter(|trade| trade.value() > trade.shares() * trade.price() * WIN_VALUE_RATIO)
            .count();
        wins as f64 / sells.len() as f64
    }

    pub fn profit_factor(trades: &[Trade]) -> f64 {
        let (sold, bought) = trades
            .iter()
            .fold((0.0, 0.0), |(sold, bought), trade| match trade.action() {
                TradeAction::Sell => (sold + trade.value(), bought),
                TradeAction::Buy => (sold, bought + trade.value()),
            });
        if bought > 0.0 {
            sold / bought
        } else {
            0.0
        }
    }

    pub fn monthly_returns(
        equity_curve: &[PortfolioSnapshot],
        initial_capital: f64,
    ) -> Vec<MonthlyReturn> {
        let mut month_ends: Vec<(String, f64)> = Vec::new();
        for snapshot in equity_curve {
            let month = snapshot.date.format("%Y-%m").to_string();
            match month_ends.last_mut() {
                Some((last_month, value)) if *last_month == month => {
                    *value = snapshot.total_value
                }
                _ => month_ends.push((month, snapshot.total_value)),
            }
        }

        let mut previous = initial_capital;
        month_ends
            .into_iter()
            .map(|(month, end_value)| {
                let return_pct = if previous > 0.0 {
                    (end_value - previous) / previous
                } else {
                    0.0
                };
                previous = end_value;
                MonthlyReturn {
                    month,
                    end_value,
                    return_pct,
                }
            })
            .collect()
    }
}
