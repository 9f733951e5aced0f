pub mod config;
pub mod context;
pub mod data_context;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod portfolio;
pub mod price_store;
pub mod scheduler;
pub mod signals;
pub mod strategy;
pub mod ticker_utils;

pub mod commands {
    pub mod analyze_portfolio;
    pub mod backtest;
    pub mod build_portfolio;
    pub mod import_csv;
    pub mod output;
}

pub use engine::BacktestEngine;
pub use errors::{DataGap, EngineError};
