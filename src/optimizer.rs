use crate::config::{OptimizerConfig, RiskProfile};
use crate::errors::{DataGap, EngineError};
use crate::models::{PortfolioAnalysis, PortfolioAsset, PricePoint, SignalDirection};
use log::{debug, info, warn};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Trading days per year.
const ANNUALIZATION: f64 = 252.0;
const PAIRWISE_CORRELATION: f64 = 0.3;
const INVERSE_VOL_EPSILON: f64 = 0.01;
const RETURN_TILT_EPSILON: f64 = 0.001;
const DEFAULT_VOLATILITY: f64 = 0.30;
const DEFAULT_BETA: f64 = 1.0;
const DEFAULT_SECTOR: &str = "Unknown";
const SIGNAL_BLEND: f64 = 0.6;
const MIN_ASSETS: usize = 2;
const FALLBACK_CANDIDATES: usize = 10;
const DRAWDOWN_VOL_MULTIPLE: f64 = 2.5;

/// Annualized statistics over a trailing daily close series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoricalStats {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
}

impl HistoricalStats {
    pub const MIN_POINTS: usize = 252;

    pub fn from_prices(
        ticker: &str,
        prices: &[PricePoint],
        risk_free_rate: f64,
    ) -> Result<Self, DataGap> {
        if prices.len() < Self::MIN_POINTS {
            return Err(DataGap::InsufficientHistory {
                ticker: ticker.to_string(),
                available: prices.len(),
                required: Self::MIN_POINTS,
            });
        }

        let returns: Vec<f64> = prices
            .windows(2)
            .map(|pair| pair[1].close / pair[0].close - 1.0)
            .collect();
        let annual_return = returns.clone().mean() * ANNUALIZATION;
        let annual_volatility = returns.clone().std_dev() * ANNUALIZATION.sqrt();

        let mut equity = 1.0;
        let mut peak = 1.0;
        let mut max_drawdown: f64 = 0.0;
        for daily in &returns {
            equity *= 1.0 + daily;
            peak = f64::max(peak, equity);
            max_drawdown = max_drawdown.min((equity - peak) / peak);
        }

        let sharpe = if annual_volatility > 0.0 {
            (annual_return - risk_free_rate) / annual_volatility
        } else {
            0.0
        };

        Ok(Self {
            annual_return,
            annual_volatility,
            max_drawdown,
            sharpe,
        })
    }
}

/// One ticker offered to the optimizer with its signal and estimates.
#[derive(Debug, Clone)]
pub struct AssetCandidate {
    pub ticker: String,
    pub signal: SignalDirection,
    pub confidence: f64,
    pub beta: Option<f64>,
    pub sector: Option<String>,
    pub historical: Option<HistoricalStats>,
}

impl AssetCandidate {
    pub fn expected_return(&self) -> f64 {
        estimate_return(self.signal, self.confidence, self.historical.as_ref())
    }

    pub fn volatility(&self) -> f64 {
        self.historical
            .map(|stats| stats.annual_volatility)
            .filter(|vol| vol.is_finite())
            .unwrap_or(DEFAULT_VOLATILITY)
    }

    fn into_asset(self, weight: f64) -> PortfolioAsset {
        let expected_return = self.expected_return();
        let volatility = self.volatility();
        PortfolioAsset {
            weight,
            expected_return,
            volatility,
            beta: self
                .beta
                .filter(|beta| beta.is_finite() && *beta != 0.0)
                .unwrap_or(DEFAULT_BETA),
            sector: self
                .sector
                .filter(|sector| !sector.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SECTOR.to_string()),
            signal: self.signal,
            confidence: self.confidence,
            ticker: self.ticker,
        }
    }
}

/// Signal-implied annual return, blended 60/40 with history when available.
pub fn estimate_return(
    signal: SignalDirection,
    confidence: f64,
    historical: Option<&HistoricalStats>,
) -> f64 {
    let base = match signal {
        SignalDirection::Bullish => 0.12 + confidence / 100.0 * 0.08,
        SignalDirection::Neutral => 0.06 + confidence / 100.0 * 0.04,
        SignalDirection::Bearish => -0.05,
    };
    match historical {
        Some(stats) => SIGNAL_BLEND * base + (1.0 - SIGNAL_BLEND) * stats.annual_return,
        None => base,
    }
}

/// Inverse-volatility weighting tilted toward expected return, with position
/// caps. Portfolio risk assumes a constant pairwise correlation of 0.3 rather
/// than an estimated covariance matrix.
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn build_portfolio(
        &self,
        candidates: Vec<AssetCandidate>,
    ) -> Result<PortfolioAnalysis, EngineError> {
        if candidates.len() < MIN_ASSETS {
            return Err(EngineError::InsufficientAssets {
                found: candidates.len(),
            });
        }

        let total = candidates.len();
        let non_bearish: Vec<AssetCandidate> = candidates
            .iter()
            .filter(|candidate| candidate.signal != SignalDirection::Bearish)
            .cloned()
            .collect();
        let qualified = if non_bearish.len() < MIN_ASSETS {
            warn!(
                "Only {} of {} candidates are not bearish; using the first {}",
                non_bearish.len(),
                total,
                FALLBACK_CANDIDATES
            );
            candidates.into_iter().take(FALLBACK_CANDIDATES).collect()
        } else {
            non_bearish
        };

        let estimates: Vec<(f64, f64)> = qualified
            .iter()
            .map(|candidate| (candidate.expected_return(), candidate.volatility()))
            .collect();
        let weights = self.optimize_weights(&estimates);

        let assets: Vec<PortfolioAsset> = qualified
            .into_iter()
            .zip(weights)
            .filter_map(|(candidate, weight)| {
                if weight >= self.config.min_position {
                    Some(candidate.into_asset(weight))
                } else {
                    debug!(
                        "{}: weight {:.4} below minimum position, dropped",
                        candidate.ticker, weight
                    );
                    None
                }
            })
            .collect();

        info!(
            "Built {} portfolio with {} of {} candidates",
            self.config.risk_profile.label(),
            assets.len(),
            total
        );
        Ok(self.portfolio_metrics(assets))
    }

    /// Aggregates for holdings as they stand; weights are not changed.
    pub fn analyze_existing(&self, holdings: Vec<(AssetCandidate, f64)>) -> PortfolioAnalysis {
        let assets = holdings
            .into_iter()
            .map(|(candidate, weight)| candidate.into_asset(weight))
            .collect();
        self.portfolio_metrics(assets)
    }

    /// Weights for `(expected_return, volatility)` estimates, summing to 1.
    pub fn optimize_weights(&self, estimates: &[(f64, f64)]) -> Vec<f64> {
        if estimates.is_empty() {
            return Vec::new();
        }
        let mut weights: Vec<f64> = estimates
            .iter()
            .map(|(_, vol)| 1.0 / (vol + INVERSE_VOL_EPSILON))
            .collect();
        normalize(&mut weights);

        let min_return = estimates
            .iter()
            .map(|(ret, _)| *ret)
            .fold(f64::INFINITY, f64::min);
        let max_return = estimates
            .iter()
            .map(|(ret, _)| *ret)
            .fold(f64::NEG_INFINITY, f64::max);
        let spread = max_return - min_return + RETURN_TILT_EPSILON;
        for (weight, (ret, _)) in weights.iter_mut().zip(estimates) {
            *weight *= 1.0 + (ret - min_return) / spread;
        }
        normalize(&mut weights);

        for weight in weights.iter_mut() {
            *weight = weight.clamp(self.config.min_position, self.config.max_position);
        }
        normalize(&mut weights);
        weights
    }

    fn portfolio_metrics(&self, assets: Vec<PortfolioAsset>) -> PortfolioAnalysis {
        let total_expected_return: f64 = assets
            .iter()
            .map(|asset| asset.weight * asset.expected_return)
            .sum();

        let mut variance = 0.0;
        for (i, a) in assets.iter().enumerate() {
            for (j, b) in assets.iter().enumerate() {
                let correlation = if i == j { 1.0 } else { PAIRWISE_CORRELATION };
                variance += a.weight * b.weight * a.volatility * b.volatility * correlation;
            }
        }
        let total_volatility = variance.max(0.0).sqrt();

        let sharpe_ratio = if total_volatility > 0.0 {
            (total_expected_return - self.config.risk_free_rate) / total_volatility
        } else {
            0.0
        };
        let beta = assets.iter().map(|asset| asset.weight * asset.beta).sum();

        let mut sector_concentration: BTreeMap<String, f64> = BTreeMap::new();
        for asset in &assets {
            *sector_concentration
                .entry(asset.sector.clone())
                .or_insert(0.0) += asset.weight;
        }
        let diversification_score = if assets.is_empty() {
            0.0
        } else {
            let hhi: f64 = sector_concentration.values().map(|w| w * w).sum();
            (1.0 - hhi) * 100.0
        };

        let rebalancing_needed = assets.iter().any(|asset| {
            asset.weight > 0.15 || asset.weight < 0.03 || asset.signal == SignalDirection::Bearish
        });

        let recommendations = self.recommendations(
            &assets,
            total_volatility,
            sharpe_ratio,
            &sector_concentration,
        );

        PortfolioAnalysis {
            assets,
            total_expected_return,
            total_volatility,
            sharpe_ratio,
            beta,
            max_drawdown_estimate: -DRAWDOWN_VOL_MULTIPLE * total_volatility,
            diversification_score,
            sector_concentration,
            rebalancing_needed,
            recommendations,
        }
    }

    fn recommendations(
        &self,
        assets: &[PortfolioAsset],
        volatility: f64,
        sharpe: f64,
        sectors: &BTreeMap<String, f64>,
    ) -> Vec<String> {
        let mut notes = Vec::new();
        if assets.is_empty() {
            return notes;
        }

        if volatility > 0.25 && self.config.risk_profile != RiskProfile::Aggressive {
            notes.push(format!(
                "High volatility ({:.1}%). Consider reducing position sizes or adding defensive names.",
                volatility * 100.0
            ));
        }
        if sharpe < 0.5 {
            notes.push(format!(
                "Low Sharpe ratio ({:.2}). Risk-adjusted returns could be improved.",
                sharpe
            ));
        } else if sharpe > 1.0 {
            notes.push(format!(
                "Excellent Sharpe ratio ({:.2}). Good risk-adjusted returns.",
                sharpe
            ));
        }

        if let Some((sector, weight)) = sectors
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            if *weight > 0.40 {
                notes.push(format!(
                    "High concentration in {} ({:.1}%). Consider diversifying.",
                    sector,
                    weight * 100.0
                ));
            }
        }

        for asset in assets {
            if asset.signal == SignalDirection::Bearish && asset.weight > 0.05 {
                notes.push(format!(
                    "Reduce {} ({:.1}%): bearish signal",
                    asset.ticker,
                    asset.weight * 100.0
                ));
            } else if asset.signal == SignalDirection::Bullish
                && asset.confidence > 80.0
                && asset.weight < 0.10
            {
                notes.push(format!(
                    "Consider increasing {}: strong bullish signal",
                    asset.ticker
                ));
            }
        }

        let small = assets.iter().filter(|asset| asset.weight < 0.03).count();
        if small > 0 {
            notes.push(format!(
                "{} positions under 3%; consider consolidating",
                small
            ));
        }
        notes
    }
}

fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for weight in weights.iter_mut() {
            *weight /= total;
        }
    }
}
