use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ticker → weight in `[0, 1]`. Weights sum to at most 1; the residual is cash.
pub type TargetAllocation = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Fundamentals {
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub sector: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed trade leg. Immutable once built by the execution engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Trade {
    date: NaiveDate,
    ticker: String,
    action: TradeAction,
    shares: f64,
    price: f64,
    value: f64,
    commission: f64,
    reason: String,
}

impl Trade {
    pub(crate) fn new(
        date: NaiveDate,
        ticker: &str,
        action: TradeAction,
        shares: f64,
        price: f64,
        commission: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            date,
            ticker: ticker.to_string(),
            action,
            shares,
            price,
            value: shares * price,
            commission,
            reason: reason.into(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn action(&self) -> TradeAction {
        self.action
    }

    pub fn shares(&self) -> f64 {
        self.shares
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn commission(&self) -> f64 {
        self.commission
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Signed cash movement this trade causes: proceeds net of commission for
    /// sells, total outlay for buys.
    pub fn cash_delta(&self) -> f64 {
        match self.action {
            TradeAction::Buy => -(self.value + self.commission),
            TradeAction::Sell => self.value - self.commission,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionDetail {
    pub shares: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub cash: f64,
    pub positions: BTreeMap<String, PositionDetail>,
    pub total_value: f64,
    pub cumulative_return: f64,
    pub benchmark_value: f64,
    pub benchmark_return: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyReturn {
    /// `YYYY-MM`
    pub month: String,
    pub end_value: f64,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub benchmark_return: f64,
    pub alpha: f64,
    pub beta: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub num_trades: usize,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<PortfolioSnapshot>,
    pub monthly_returns: Vec<MonthlyReturn>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Bullish => "bullish",
            SignalDirection::Bearish => "bearish",
            SignalDirection::Neutral => "neutral",
        }
    }
}

impl FromStr for SignalDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(SignalDirection::Bullish),
            "bearish" => Ok(SignalDirection::Bearish),
            "neutral" => Ok(SignalDirection::Neutral),
            other => Err(format!("Unknown signal direction: {}", other)),
        }
    }
}

/// One persona's opinion on a ticker. Confidence is on a 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaSignal {
    pub persona: String,
    pub signal: SignalDirection,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl PersonaSignal {
    pub fn neutral_placeholder(persona: &str, reasoning: impl Into<String>) -> Self {
        Self {
            persona: persona.to_string(),
            signal: SignalDirection::Neutral,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConsensusSignal {
    pub ticker: String,
    pub signal: SignalDirection,
    pub confidence: f64,
    pub agreement: String,
    pub persona_signals: Vec<PersonaSignal>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PortfolioAsset {
    pub ticker: String,
    pub weight: f64,
    pub signal: SignalDirection,
    pub confidence: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub beta: f64,
    pub sector: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioAnalysis {
    pub assets: Vec<PortfolioAsset>,
    pub total_expected_return: f64,
    pub total_volatility: f64,
    pub sharpe_ratio: f64,
    pub beta: f64,
    pub max_drawdown_estimate: f64,
    pub diversification_score: f64,
    pub sector_concentration: BTreeMap<String, f64>,
    pub rebalancing_needed: bool,
    pub recommendations: Vec<String>,
}
