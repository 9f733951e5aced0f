use crate::data_context::MarketData;
use crate::models::{Fundamentals, PersonaSignal, PricePoint, SignalDirection};
use crate::ticker_utils::normalize_ticker_symbol;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct PriceRow {
    date: NaiveDate,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct FundamentalsRow {
    ticker: String,
    pe_ratio: Option<f64>,
    pb_ratio: Option<f64>,
    beta: Option<f64>,
    sector: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    ticker: String,
    persona: String,
    signal: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct ImportArgs {
    pub prices_dir: PathBuf,
    pub benchmark_ticker: String,
    pub benchmark_file: Option<PathBuf>,
    pub fundamentals_file: Option<PathBuf>,
    pub signals_file: Option<PathBuf>,
    pub settings: Vec<(String, String)>,
    pub output: PathBuf,
}

/// Converts CSV exports into a market-data snapshot file.
pub fn run(args: &ImportArgs) -> Result<MarketData> {
    let data = build_market_data(args)?;
    data.save_to_file(&args.output)?;
    info!(
        "Wrote snapshot with {} tickers to {}",
        data.tickers().len(),
        args.output.display()
    );
    Ok(data)
}

pub fn build_market_data(args: &ImportArgs) -> Result<MarketData> {
    let mut data = MarketData::new(&args.benchmark_ticker);

    let mut files: Vec<PathBuf> = fs::read_dir(&args.prices_dir)
        .with_context(|| format!("Failed to read prices directory {}", args.prices_dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    for path in &files {
        let Some(ticker) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(normalize_ticker_symbol)
        else {
            warn!("Skipping {}: file name is not a ticker", path.display());
            continue;
        };
        let points = read_prices(path)?;
        if points.is_empty() {
            warn!("{} has no rows; ticker skipped", path.display());
            continue;
        }
        info!("Imported {} closes for {}", points.len(), ticker);
        data.insert_series(&ticker, points);
    }

    if let Some(path) = &args.benchmark_file {
        let points = read_prices(path)?;
        info!(
            "Imported {} benchmark closes for {}",
            points.len(),
            data.benchmark_ticker()
        );
        let benchmark = data.benchmark_ticker().to_string();
        data.insert_series(&benchmark, points);
    }

    if data.tickers().is_empty() {
        return Err(anyhow!(
            "No price files found in {}",
            args.prices_dir.display()
        ));
    }

    if let Some(path) = &args.fundamentals_file {
        for (ticker, fundamentals) in read_fundamentals(path)? {
            data.insert_fundamentals(&ticker, fundamentals);
        }
    }

    if let Some(path) = &args.signals_file {
        for (ticker, signals) in read_signals(path)? {
            data.insert_persona_signals(&ticker, signals);
        }
    }

    for (key, value) in &args.settings {
        data.set_setting(&key.to_ascii_uppercase(), value);
    }

    Ok(data)
}

fn open_csv(path: &Path) -> Result<csv::Reader<File>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(ReaderBuilder::new().trim(Trim::All).from_reader(file))
}

fn read_prices(path: &Path) -> Result<Vec<PricePoint>> {
    let mut reader = open_csv(path)?;
    let mut points = Vec::new();
    for (line, row) in reader.deserialize::<PriceRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        points.push(PricePoint {
            date: row.date,
            close: row.close,
        });
    }
    Ok(points)
}

fn read_fundamentals(path: &Path) -> Result<Vec<(String, Fundamentals)>> {
    let mut reader = open_csv(path)?;
    let mut rows = Vec::new();
    for (line, row) in reader.deserialize::<FundamentalsRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        rows.push((
            row.ticker,
            Fundamentals {
                pe_ratio: row.pe_ratio,
                pb_ratio: row.pb_ratio,
                beta: row.beta,
                sector: row.sector.filter(|sector| !sector.is_empty()),
            },
        ));
    }
    info!("Imported fundamentals for {} tickers", rows.len());
    Ok(rows)
}

fn read_signals(path: &Path) -> Result<BTreeMap<String, Vec<PersonaSignal>>> {
    let mut reader = open_csv(path)?;
    let mut grouped: BTreeMap<String, Vec<PersonaSignal>> = BTreeMap::new();
    for (line, row) in reader.deserialize::<SignalRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        let signal = row
            .signal
            .parse::<SignalDirection>()
            .map_err(|err| anyhow!("{}: row {}: {}", path.display(), line + 2, err))?;
        grouped
            .entry(row.ticker.to_ascii_uppercase())
            .or_default()
            .push(PersonaSignal {
                persona: row.persona,
                signal,
                confidence: row.confidence.clamp(0.0, 100.0),
                reasoning: row.reasoning,
            });
    }
    info!("Imported persona signals for {} tickers", grouped.len());
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_context::{FundamentalsProvider, PriceProvider};
    use tempfile::tempdir;

    fn args(dir: &Path) -> ImportArgs {
        ImportArgs {
            prices_dir: dir.join("prices"),
            benchmark_ticker: "SPY".to_string(),
            benchmark_file: None,
            fundamentals_file: None,
            signals_file: None,
            settings: Vec::new(),
            output: dir.join("out/market.bin"),
        }
    }

    #[test]
    fn imports_prices_fundamentals_and_signals() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("prices")).unwrap();
        fs::write(
            dir.path().join("prices/aapl.csv"),
            "date,close\n2024-01-03,101.5\n2024-01-02,100.0\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("prices/SPY.csv"),
            "date,close\n2024-01-02,470.0\n",
        )
        .unwrap();
        fs::write(dir.path().join("prices/notes.txt"), "ignored").unwrap();
        fs::write(
            dir.path().join("fundamentals.csv"),
            "ticker,pe_ratio,pb_ratio,beta,sector\nAAPL,28.5,,1.2,Technology\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("signals.csv"),
            "ticker,persona,signal,confidence,reasoning\naapl,Deep Value,Bearish,70,pricey\n",
        )
        .unwrap();

        let mut import = args(dir.path());
        import.fundamentals_file = Some(dir.path().join("fundamentals.csv"));
        import.signals_file = Some(dir.path().join("signals.csv"));
        import.settings = vec![("commission_rate".to_string(), "0.002".to_string())];
        run(&import).unwrap();

        let data = MarketData::load_from_file(&import.output).unwrap();
        assert_eq!(data.tickers(), vec!["AAPL".to_string()]);
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        let history = data.history("AAPL", day(1), day(31)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].date, day(2));
        assert_eq!(data.benchmark(day(1), day(31)).unwrap().len(), 1);

        let fundamentals = data.snapshot("AAPL", day(2)).unwrap();
        assert_eq!(fundamentals.pe_ratio, Some(28.5));
        assert_eq!(fundamentals.pb_ratio, None);
        assert_eq!(fundamentals.sector.as_deref(), Some("Technology"));

        let signals = data.persona_signals_for("AAPL").unwrap();
        assert_eq!(signals[0].signal, SignalDirection::Bearish);
        assert_eq!(
            data.settings().get("COMMISSION_RATE").map(String::as_str),
            Some("0.002")
        );
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("prices")).unwrap();
        assert!(build_market_data(&args(dir.path())).is_err());
    }

    #[test]
    fn malformed_row_names_the_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("prices")).unwrap();
        fs::write(
            dir.path().join("prices/BAD.csv"),
            "date,close\n2024-13-45,abc\n",
        )
        .unwrap();
        let err = build_market_data(&args(dir.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("BAD.csv"));
    }
}
