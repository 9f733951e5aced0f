use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use portfolio_engine::{
    commands::{
        analyze_portfolio, backtest, build_portfolio, import_csv, output::write_json,
    },
    context::AppContext,
    ticker_utils::parse_ticker_list,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "portfolio-engine")]
#[command(about = "Backtest and construct multi-asset equity portfolios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a strategy over a date range and print the result as JSON
    Backtest {
        /// Comma or space separated tickers (all snapshot tickers when omitted)
        #[arg(num_args = 0..)]
        tickers: Vec<String>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// equal_weight, momentum, value, ai_consensus or optimized
        #[arg(long, default_value = "equal_weight")]
        strategy: String,
        /// weekly, monthly or quarterly
        #[arg(long)]
        rebalance: Option<String>,
        #[arg(long)]
        capital: Option<f64>,
        #[arg(long)]
        commission: Option<f64>,
        /// Strategy parameter override, e.g. --param shortLookback=42
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Build an optimized allocation from signals and price history
    BuildPortfolio {
        #[arg(num_args = 0..)]
        tickers: Vec<String>,
        /// conservative, moderate or aggressive
        #[arg(long)]
        risk: Option<String>,
        #[arg(long)]
        max_position: Option<f64>,
        #[arg(long)]
        min_position: Option<f64>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Report risk and concentration of existing holdings (TICKER:WEIGHT,...)
    AnalyzePortfolio {
        holdings: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Convert per-ticker CSV files into a market data snapshot
    ImportCsv {
        /// Directory of <TICKER>.csv files with date,close rows
        #[arg(long, value_name = "DIR")]
        prices_dir: PathBuf,
        #[arg(long, default_value = "SPY")]
        benchmark_ticker: String,
        #[arg(long, value_name = "PATH")]
        benchmark_file: Option<PathBuf>,
        /// CSV with ticker,pe_ratio,pb_ratio,beta,sector rows
        #[arg(long, value_name = "PATH")]
        fundamentals: Option<PathBuf>,
        /// CSV with ticker,persona,signal,confidence,reasoning rows
        #[arg(long, value_name = "PATH")]
        signals: Option<PathBuf>,
        /// Setting stored in the snapshot, e.g. --set COMMISSION_RATE=0.0005
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        settings: Vec<(String, String)>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    info!("Starting portfolio engine. Not financial advice.");

    match command {
        Commands::Backtest {
            tickers,
            start,
            end,
            strategy,
            rebalance,
            capital,
            commission,
            params,
            data_file,
            output,
        } => {
            let mut overrides = HashMap::new();
            insert_override(&mut overrides, "REBALANCE_FREQUENCY", rebalance);
            insert_override(&mut overrides, "INITIAL_CAPITAL", capital);
            insert_override(&mut overrides, "COMMISSION_RATE", commission);
            let ctx = AppContext::from_data_file(resolve_market_data_path(data_file), overrides)?;
            let args = backtest::BacktestArgs {
                tickers: split_tickers(&tickers),
                start,
                end,
                strategy,
                params,
                output,
            };
            backtest::run(Arc::new(ctx), args).await?;
        }
        Commands::BuildPortfolio {
            tickers,
            risk,
            max_position,
            min_position,
            as_of,
            data_file,
            output,
        } => {
            let mut overrides = HashMap::new();
            insert_override(&mut overrides, "RISK_PROFILE", risk);
            insert_override(&mut overrides, "MAX_POSITION", max_position);
            insert_override(&mut overrides, "MIN_POSITION", min_position);
            let ctx = AppContext::from_data_file(resolve_market_data_path(data_file), overrides)?;
            let analysis = build_portfolio::run(&ctx, &split_tickers(&tickers), as_of).await?;
            write_json(&analysis, output.as_deref())?;
        }
        Commands::AnalyzePortfolio {
            holdings,
            as_of,
            data_file,
            output,
        } => {
            let ctx =
                AppContext::from_data_file(resolve_market_data_path(data_file), HashMap::new())?;
            let analysis = analyze_portfolio::run(&ctx, &holdings, as_of).await?;
            write_json(&analysis, output.as_deref())?;
        }
        Commands::ImportCsv {
            prices_dir,
            benchmark_ticker,
            benchmark_file,
            fundamentals,
            signals,
            settings,
            output,
        } => {
            let args = import_csv::ImportArgs {
                prices_dir,
                benchmark_ticker,
                benchmark_file,
                fundamentals_file: fundamentals,
                signals_file: signals,
                settings,
                output: resolve_market_data_path(output),
            };
            tokio::task::spawn_blocking(move || import_csv::run(&args)).await??;
        }
    }

    Ok(())
}

fn insert_override<T: ToString>(
    overrides: &mut HashMap<String, String>,
    key: &str,
    value: Option<T>,
) {
    if let Some(value) = value {
        overrides.insert(key.to_string(), value.to_string());
    }
}

fn split_tickers(raw: &[String]) -> Vec<String> {
    parse_ticker_list(&raw.join(","))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", raw))
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE))
}
