use crate::errors::DataGap;
use crate::models::{Fundamentals, PersonaSignal, PricePoint};
use crate::ticker_utils::normalize_ticker_symbol;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

/// Source of historical close prices.
pub trait PriceProvider: Send + Sync {
    /// Ordered `(date, close)` pairs for `ticker` within `[start, end]`.
    fn history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGap>;

    /// Same shape as `history`, for the benchmark index.
    fn benchmark(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>, DataGap>;
}

/// Source of valuation ratios and classification. Absent fields are `None`;
/// an `Err` means the fetch itself failed.
pub trait FundamentalsProvider: Send + Sync {
    fn snapshot(&self, ticker: &str, date: NaiveDate) -> Result<Fundamentals, DataGap>;
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    data: MarketData,
}

/// In-memory market data: close series per ticker (benchmark included),
/// fundamentals, recorded persona signals and a settings map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    series: BTreeMap<String, Vec<PricePoint>>,
    benchmark_ticker: String,
    fundamentals: BTreeMap<String, Fundamentals>,
    persona_signals: BTreeMap<String, Vec<PersonaSignal>>,
    settings: HashMap<String, String>,
}

impl MarketData {
    pub fn new(benchmark_ticker: &str) -> Self {
        Self {
            series: BTreeMap::new(),
            benchmark_ticker: benchmark_ticker.trim().to_ascii_uppercase(),
            fundamentals: BTreeMap::new(),
            persona_signals: BTreeMap::new(),
            settings: HashMap::new(),
        }
    }

    pub fn insert_series(&mut self, ticker: &str, mut points: Vec<PricePoint>) {
        let Some(symbol) = normalize_ticker_symbol(ticker) else {
            return;
        };
        points.sort_by_key(|point| point.date);
        self.series.insert(symbol, points);
    }

    pub fn insert_fundamentals(&mut self, ticker: &str, fundamentals: Fundamentals) {
        if let Some(symbol) = normalize_ticker_symbol(ticker) {
            self.fundamentals.insert(symbol, fundamentals);
        }
    }

    pub fn insert_persona_signals(&mut self, ticker: &str, signals: Vec<PersonaSignal>) {
        if let Some(symbol) = normalize_ticker_symbol(ticker) {
            self.persona_signals.insert(symbol, signals);
        }
    }

    pub fn set_setting(&mut self, key: &str, value: &str) {
        self.settings.insert(key.to_string(), value.to_string());
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn benchmark_ticker(&self) -> &str {
        &self.benchmark_ticker
    }

    /// Tickers with a price series, excluding the benchmark.
    pub fn tickers(&self) -> Vec<String> {
        self.series
            .keys()
            .filter(|ticker| **ticker != self.benchmark_ticker)
            .cloned()
            .collect()
    }

    pub fn persona_signals_for(&self, ticker: &str) -> Option<&[PersonaSignal]> {
        self.persona_signals
            .get(&ticker.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded {} price series (benchmark {}) generated at {}",
            snapshot.data.series.len(),
            snapshot.data.benchmark_ticker,
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(snapshot.data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            data: self.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    fn window(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGap> {
        let key = ticker.to_ascii_uppercase();
        let points = self
            .series
            .get(&key)
            .ok_or_else(|| DataGap::MissingSeries { ticker: key.clone() })?;
        Ok(points
            .iter()
            .filter(|point| point.date >= start && point.date <= end)
            .copied()
            .collect())
    }
}

impl PriceProvider for MarketData {
    fn history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, DataGap> {
        self.window(ticker, start, end)
    }

    fn benchmark(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>, DataGap> {
        self.window(&self.benchmark_ticker, start, end)
    }
}

impl FundamentalsProvider for MarketData {
    // Unknown tickers get empty fundamentals; the snapshot simply has nothing on file.
    fn snapshot(&self, ticker: &str, _date: NaiveDate) -> Result<Fundamentals, DataGap> {
        Ok(self
            .fundamentals
            .get(&ticker.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalDirection;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sample() -> MarketData {
        let mut data = MarketData::new("spy");
        data.insert_series(
            " aaa ",
            vec![
                PricePoint { date: day(3), close: 12.0 },
                PricePoint { date: day(2), close: 11.0 },
                PricePoint { date: day(4), close: 13.0 },
            ],
        );
        data.insert_series("SPY", vec![PricePoint { date: day(2), close: 400.0 }]);
        data
    }

    #[test]
    fn history_is_sorted_and_windowed() {
        let data = sample();
        let points = data.history("AAA", day(2), day(3)).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, day(2));
        assert_eq!(points[1].date, day(3));
    }

    #[test]
    fn unknown_ticker_is_a_missing_series() {
        let data = sample();
        let err = data.history("ZZZ", day(1), day(5)).unwrap_err();
        assert_eq!(
            err,
            DataGap::MissingSeries {
                ticker: "ZZZ".to_string()
            }
        );
    }

    #[test]
    fn benchmark_is_excluded_from_tickers() {
        let data = sample();
        assert_eq!(data.tickers(), vec!["AAA".to_string()]);
        assert_eq!(data.benchmark(day(1), day(5)).unwrap().len(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let mut data = sample();
        data.insert_fundamentals(
            "aaa",
            Fundamentals {
                pe_ratio: Some(12.0),
                pb_ratio: None,
                beta: Some(1.1),
                sector: Some("Tech".to_string()),
            },
        );
        data.insert_persona_signals(
            "AAA",
            vec![PersonaSignal {
                persona: "Technical Analyst".to_string(),
                signal: SignalDirection::Bullish,
                confidence: 70.0,
                reasoning: "trend".to_string(),
            }],
        );
        data.set_setting("COMMISSION_RATE", "0.002");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("market.bin");
        data.save_to_file(&path).unwrap();
        let loaded = MarketData::load_from_file(&path).unwrap();

        assert_eq!(loaded.tickers(), vec!["AAA".to_string()]);
        assert_eq!(loaded.settings().get("COMMISSION_RATE").unwrap(), "0.002");
        assert_eq!(loaded.snapshot("AAA", day(1)).unwrap().pe_ratio, Some(12.0));
        assert_eq!(loaded.persona_signals_for("aaa").unwrap().len(), 1);
    }
}
