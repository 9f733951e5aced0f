use chrono::NaiveDate;
use thiserror::Error;

/// Conditions that abort a whole backtest or optimizer invocation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("no equity curve could be built: no price data for any ticker between {start} and {end}")]
    EmptyResultSet { start: NaiveDate, end: NaiveDate },

    #[error("need at least 2 valid assets for portfolio construction (found {found})")]
    InsufficientAssets { found: usize },

    #[error("trade requires {required:.2} cash but only {available:.2} is available")]
    CashConstraintViolation { required: f64, available: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// Per-ticker/per-date data problems. These never unwind the simulation loop;
/// callers fall back to excluding or neutrally weighting the ticker.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataGap {
    #[error("no price series for {ticker}")]
    MissingSeries { ticker: String },

    #[error("no price for {ticker} at or before {date}")]
    MissingPrice { ticker: String, date: NaiveDate },

    #[error("{ticker} has {available} trailing points, {required} required")]
    InsufficientHistory {
        ticker: String,
        available: usize,
        required: usize,
    },

    #[error("fundamentals unavailable for {ticker}: {reason}")]
    MissingFundamentals { ticker: String, reason: String },
}
