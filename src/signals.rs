use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::AiConsensusConfig;
use crate::data_context::MarketData;
use crate::models::{ConsensusSignal, Fundamentals, PersonaSignal, PricePoint, SignalDirection};

/// Score a side needs (and must beat the other side by) to win the consensus.
const CONSENSUS_THRESHOLD: f64 = 0.35;
const MAX_CONSENSUS_CONFIDENCE: f64 = 95.0;

/// An investing viewpoint queried by the ensemble, weighted in the consensus.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub philosophy: String,
    pub weight: f64,
}

impl Persona {
    pub fn new(name: &str, philosophy: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            philosophy: philosophy.to_string(),
            weight,
        }
    }
}

pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "Quality Value",
            "Durable competitive advantages bought at fair prices",
            1.3,
        ),
        Persona::new(
            "Rational Long-Term",
            "Simple businesses with high returns on capital held for years",
            1.2,
        ),
        Persona::new(
            "Deep Value",
            "Margin of safety against conservative intrinsic value",
            1.1,
        ),
        Persona::new(
            "Contrarian",
            "Unloved assets where pessimism exceeds fundamentals",
            0.9,
        ),
        Persona::new(
            "Growth Innovation",
            "Disruptive growth with large addressable markets",
            0.9,
        ),
        Persona::new(
            "Growth at Reasonable Price",
            "Earnings growth that the multiple has not priced in",
            1.0,
        ),
        Persona::new("Technical Analyst", "Trend and momentum in price action", 0.7),
        Persona::new(
            "Risk Manager",
            "Volatility, leverage and downside exposure",
            1.0,
        ),
    ]
}

/// Everything a persona may look at for one ticker as of one date.
#[derive(Debug, Clone)]
pub struct AsOfData {
    pub ticker: String,
    pub date: NaiveDate,
    pub history: Vec<PricePoint>,
    pub fundamentals: Option<Fundamentals>,
}

/// External source of per-persona opinions.
pub trait SignalEnsemble: Send + Sync {
    fn personas(&self) -> Vec<Persona>;

    /// Blocking evaluation of one persona; runs on a blocking worker.
    fn evaluate(&self, persona: &Persona, data: &AsOfData) -> Result<PersonaSignal>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PersonaFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("evaluation failed: {0}")]
    Failed(String),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

pub type PersonaOutcome = (Persona, Result<PersonaSignal, PersonaFailure>);

async fn run_persona(
    ensemble: Arc<dyn SignalEnsemble>,
    persona: Persona,
    data: Arc<AsOfData>,
    slots: Arc<Semaphore>,
    timeout: Duration,
) -> PersonaOutcome {
    let worker_persona = persona.clone();
    let evaluation = async move {
        let permit = match slots.acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => return Err(PersonaFailure::Failed(err.to_string())),
        };
        // Held until the blocking call returns, even if the timeout drops the join handle.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            ensemble.evaluate(&worker_persona, &data)
        })
        .await
        .map_err(|join_err| PersonaFailure::Panicked(join_err.to_string()))
    };

    let outcome = match tokio::time::timeout(timeout, evaluation).await {
        Err(_) => Err(PersonaFailure::Timeout(timeout)),
        Ok(Err(failure)) => Err(failure),
        Ok(Ok(Err(err))) => Err(PersonaFailure::Failed(err.to_string())),
        Ok(Ok(Ok(signal))) if !signal.confidence.is_finite() => Err(PersonaFailure::Failed(
            format!("non-finite confidence {}", signal.confidence),
        )),
        Ok(Ok(Ok(mut signal))) => {
            signal.confidence = signal.confidence.clamp(0.0, 100.0);
            signal.persona = persona.name.clone();
            Ok(signal)
        }
    };
    (persona, outcome)
}

/// Queries every persona for one ticker with at most `config.workers` in
/// flight. Outcomes arrive in completion order, one per persona. Time spent
/// waiting for a slot held by a timed-out evaluation counts against the
/// waiting persona's timeout.
pub async fn collect_persona_signals(
    ensemble: Arc<dyn SignalEnsemble>,
    personas: Vec<Persona>,
    data: Arc<AsOfData>,
    config: &AiConsensusConfig,
) -> Vec<PersonaOutcome> {
    let worker_limit = config.workers.max(1).min(personas.len().max(1));
    let slots = Arc::new(Semaphore::new(worker_limit));
    let mut pending = personas.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut outcomes = Vec::new();

    for _ in 0..worker_limit {
        if let Some(persona) = pending.next() {
            in_flight.push(run_persona(
                Arc::clone(&ensemble),
                persona,
                Arc::clone(&data),
                Arc::clone(&slots),
                config.persona_timeout,
            ));
        }
    }

    while let Some(outcome) = in_flight.next().await {
        outcomes.push(outcome);
        if let Some(persona) = pending.next() {
            in_flight.push(run_persona(
                Arc::clone(&ensemble),
                persona,
                Arc::clone(&data),
                Arc::clone(&slots),
                config.persona_timeout,
            ));
        }
    }

    outcomes
}

/// Replaces failed persona outcomes with zero-confidence neutral signals.
pub fn degrade_failures(ticker: &str, outcomes: Vec<PersonaOutcome>) -> Vec<PersonaSignal> {
    outcomes
        .into_iter()
        .map(|(persona, outcome)| match outcome {
            Ok(signal) => signal,
            Err(failure) => {
                warn!(
                    "Persona {} failed for {}: {}; using neutral placeholder",
                    persona.name, ticker, failure
                );
                PersonaSignal::neutral_placeholder(&persona.name, failure.to_string())
            }
        })
        .collect()
}

/// Weighted vote across persona signals.
pub fn build_consensus(
    ticker: &str,
    personas: &[Persona],
    signals: Vec<PersonaSignal>,
) -> ConsensusSignal {
    let weights: BTreeMap<&str, f64> = personas
        .iter()
        .map(|persona| (persona.name.as_str(), persona.weight))
        .collect();

    let mut bullish_score = 0.0;
    let mut bearish_score = 0.0;
    let mut total_weight = 0.0;
    let mut bullish_count = 0usize;
    let mut bearish_count = 0usize;

    for signal in &signals {
        let weight = weights.get(signal.persona.as_str()).copied().unwrap_or(1.0);
        total_weight += weight;
        let contribution = weight * signal.confidence / 100.0;
        match signal.signal {
            SignalDirection::Bullish => {
                bullish_score += contribution;
                bullish_count += 1;
            }
            SignalDirection::Bearish => {
                bearish_score += contribution;
                bearish_count += 1;
            }
            SignalDirection::Neutral => {}
        }
    }

    if total_weight > 0.0 {
        bullish_score /= total_weight;
        bearish_score /= total_weight;
    }

    let (direction, confidence) =
        if bullish_score > bearish_score && bullish_score > CONSENSUS_THRESHOLD {
            (
                SignalDirection::Bullish,
                (bullish_score * 100.0).min(MAX_CONSENSUS_CONFIDENCE),
            )
        } else if bearish_score > bullish_score && bearish_score > CONSENSUS_THRESHOLD {
            (
                SignalDirection::Bearish,
                (bearish_score * 100.0).min(MAX_CONSENSUS_CONFIDENCE),
            )
        } else {
            (
                SignalDirection::Neutral,
                (1.0 - (bullish_score - bearish_score).abs()) * 50.0 + 25.0,
            )
        };

    let total = signals.len();
    ConsensusSignal {
        ticker: ticker.to_string(),
        signal: direction,
        confidence,
        agreement: format!(
            "{}/{} bullish, {}/{} bearish",
            bullish_count, total, bearish_count, total
        ),
        persona_signals: signals,
    }
}

/// Fan-out plus vote for one ticker.
pub async fn evaluate_ticker(
    ensemble: Arc<dyn SignalEnsemble>,
    data: AsOfData,
    config: &AiConsensusConfig,
) -> ConsensusSignal {
    let personas = ensemble.personas();
    let ticker = data.ticker.clone();
    let outcomes =
        collect_persona_signals(ensemble, personas.clone(), Arc::new(data), config).await;
    let signals = degrade_failures(&ticker, outcomes);
    let consensus = build_consensus(&ticker, &personas, signals);
    debug!(
        "{}: consensus {} ({:.0}%), {}",
        ticker,
        consensus.signal.as_str(),
        consensus.confidence,
        consensus.agreement
    );
    consensus
}

/// Replays persona signals stored in a market-data snapshot.
#[derive(Debug, Clone)]
pub struct RecordedEnsemble {
    personas: Vec<Persona>,
    recorded: BTreeMap<String, Vec<PersonaSignal>>,
}

impl RecordedEnsemble {
    pub fn new(personas: Vec<Persona>) -> Self {
        Self {
            personas,
            recorded: BTreeMap::new(),
        }
    }

    pub fn from_market_data(data: &MarketData, personas: Vec<Persona>) -> Self {
        let mut ensemble = Self::new(personas);
        for ticker in data.tickers() {
            if let Some(signals) = data.persona_signals_for(&ticker) {
                ensemble.record(&ticker, signals.to_vec());
            }
        }
        info!(
            "Recorded ensemble ready with {} tickers and {} personas",
            ensemble.recorded.len(),
            ensemble.personas.len()
        );
        ensemble
    }

    pub fn record(&mut self, ticker: &str, signals: Vec<PersonaSignal>) {
        self.recorded.insert(ticker.to_ascii_uppercase(), signals);
    }
}

impl SignalEnsemble for RecordedEnsemble {
    fn personas(&self) -> Vec<Persona> {
        self.personas.clone()
    }

    fn evaluate(&self, persona: &Persona, data: &AsOfData) -> Result<PersonaSignal> {
        self.recorded
            .get(&data.ticker.to_ascii_uppercase())
            .and_then(|signals| signals.iter().find(|signal| signal.persona == persona.name))
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "No recorded signal from {} for {}",
                    persona.name,
                    data.ticker
                )
            })
    }
}
