use crate::config::{AiConsensusConfig, OptimizerConfig};
use crate::data_context::FundamentalsProvider;
use crate::errors::EngineError;
use crate::models::TargetAllocation;
use crate::param_utils::StrategyParams;
use crate::price_store::HistoricalPriceStore;
use crate::signals::SignalEnsemble;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Read-only data a strategy may consult on a rebalance date.
pub struct StrategyContext<'a> {
    pub prices: &'a HistoricalPriceStore,
    pub fundamentals: &'a dyn FundamentalsProvider,
}

pub trait StrategySignalProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Non-negative weights summing to at most 1. A ticker whose data fails
    /// gets a neutral or zero weight; the call itself never fails.
    fn target_weights(
        &self,
        tickers: &[String],
        date: NaiveDate,
        ctx: &StrategyContext<'_>,
    ) -> TargetAllocation;

    /// Calendar days of price history needed before the first rebalance.
    fn warmup_days(&self) -> i64 {
        0
    }
}

#[path = "strategies/equal_weight.rs"]
pub mod equal_weight;

pub use equal_weight::EqualWeightStrategy;

#[path = "strategies/momentum.rs"]
pub mod momentum;

pub use momentum::MomentumStrategy;

#[path = "strategies/value.rs"]
pub mod value;

pub use value::ValueStrategy;

#[path = "strategies/ai_consensus.rs"]
pub mod ai_consensus;

pub use ai_consensus::AiConsensusStrategy;

#[path = "strategies/optimized.rs"]
pub mod optimized;

pub use optimized::OptimizedStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    EqualWeight,
    Momentum,
    Value,
    AiConsensus,
    Optimized,
}

impl StrategyKind {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "equal_weight" | "equal" => Ok(Self::EqualWeight),
            "momentum" => Ok(Self::Momentum),
            "value" => Ok(Self::Value),
            "ai_consensus" | "ai" => Ok(Self::AiConsensus),
            "optimized" => Ok(Self::Optimized),
            _ => Err(EngineError::UnknownStrategy(raw.trim().to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::EqualWeight => "equal_weight",
            Self::Momentum => "momentum",
            Self::Value => "value",
            Self::AiConsensus => "ai_consensus",
            Self::Optimized => "optimized",
        }
    }
}

/// Collaborators some strategies need beyond their parameters.
#[derive(Clone, Default)]
pub struct StrategyDeps {
    pub ensemble: Option<Arc<dyn SignalEnsemble>>,
    pub runtime: Option<Handle>,
    pub ai_config: AiConsensusConfig,
    pub optimizer_config: OptimizerConfig,
}

pub fn create_strategy(
    kind: StrategyKind,
    parameters: StrategyParams,
    deps: StrategyDeps,
) -> Result<Box<dyn StrategySignalProvider>, EngineError> {
    match kind {
        StrategyKind::EqualWeight => Ok(Box::new(EqualWeightStrategy::new())),
        StrategyKind::Momentum => Ok(Box::new(MomentumStrategy::new(parameters))),
        StrategyKind::Value => Ok(Box::new(ValueStrategy::new(parameters))),
        StrategyKind::AiConsensus => {
            let ensemble = deps.ensemble.ok_or_else(|| {
                EngineError::InvalidConfig(
                    "ai_consensus strategy requires a signal ensemble".to_string(),
                )
            })?;
            let runtime = deps
                .runtime
                .or_else(|| Handle::try_current().ok())
                .ok_or_else(|| {
                    EngineError::InvalidConfig(
                        "ai_consensus strategy requires a tokio runtime".to_string(),
                    )
                })?;
            Ok(Box::new(AiConsensusStrategy::new(
                ensemble,
                runtime,
                deps.ai_config,
                parameters,
            )))
        }
        StrategyKind::Optimized => {
            deps.optimizer_config.validate()?;
            Ok(Box::new(OptimizedStrategy::new(
                deps.optimizer_config,
                deps.ensemble,
                deps.runtime.or_else(|| Handle::try_current().ok()),
                deps.ai_config,
            )))
        }
    }
}

/// Drops non-positive or non-finite scores and scales the rest to sum to 1.
/// All-zero input yields an empty allocation.
pub fn normalize_weights(scores: BTreeMap<String, f64>) -> TargetAllocation {
    let positive: TargetAllocation = scores
        .into_iter()
        .filter(|(_, score)| score.is_finite() && *score > 0.0)
        .collect();
    let total: f64 = positive.values().sum();
    if total <= 0.0 {
        return TargetAllocation::new();
    }
    positive
        .into_iter()
        .map(|(ticker, score)| (ticker, score / total))
        .collect()
}
