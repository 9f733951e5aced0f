use chrono::NaiveDate;
use portfolio_engine::commands::{analyze_portfolio, backtest, build_portfolio};
use portfolio_engine::context::AppContext;
use portfolio_engine::data_context::MarketData;
use portfolio_engine::models::{PersonaSignal, PricePoint, SignalDirection};
use portfolio_engine::scheduler::business_days;
use portfolio_engine::signals::default_personas;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn market_data() -> MarketData {
    let days = business_days(date(2022, 1, 3), date(2023, 6, 30));
    let mut rng = StdRng::seed_from_u64(3);
    let mut data = MarketData::new("SPY");
    for (ticker, start) in [("AAA", 25.0), ("BBB", 70.0), ("CCC", 140.0), ("SPY", 420.0)] {
        let mut close = start;
        let points = days
            .iter()
            .map(|&date| {
                close *= 1.0 + rng.gen_range(-0.02..0.021);
                PricePoint { date, close }
            })
            .collect();
        data.insert_series(ticker, points);
    }
    data.insert_persona_signals(
        "AAA",
        default_personas()
            .iter()
            .map(|p| PersonaSignal {
                persona: p.name.clone(),
                signal: SignalDirection::Bullish,
                confidence: 75.0,
                reasoning: "steady compounding".to_string(),
            })
            .collect(),
    );
    data
}

fn context(overrides: &[(&str, &str)]) -> AppContext {
    let cli = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppContext::new(market_data(), cli, HashMap::new())
}

#[test]
fn backtest_command_writes_result_json() {
    let rt = runtime();
    let dir = tempdir().unwrap();
    let output = dir.path().join("reports/result.json");
    let ctx = Arc::new(context(&[("REBALANCE_FREQUENCY", "weekly")]));

    let result = rt
        .block_on(backtest::run(
            ctx,
            backtest::BacktestArgs {
                tickers: Vec::new(),
                start: date(2023, 1, 2),
                end: date(2023, 6, 30),
                strategy: "ai-consensus".to_string(),
                params: vec!["neutralWeight=0.1".to_string()],
                output: Some(output.clone()),
            },
        ))
        .unwrap();

    assert_eq!(result.strategy_name, "ai_consensus");
    assert!(result.num_trades > 0);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["num_trades"], serde_json::json!(result.num_trades));
    assert_eq!(
        written["equity_curve"].as_array().unwrap().len(),
        result.equity_curve.len()
    );
}

#[test]
fn backtest_command_rejects_unknown_strategy_and_bad_params() {
    let rt = runtime();
    let make_args = |strategy: &str, params: Vec<String>| backtest::BacktestArgs {
        tickers: vec!["AAA".to_string()],
        start: date(2023, 1, 2),
        end: date(2023, 3, 31),
        strategy: strategy.to_string(),
        params,
        output: None,
    };

    let ctx = Arc::new(context(&[]));
    let err = rt
        .block_on(backtest::run(Arc::clone(&ctx), make_args("martingale", Vec::new())))
        .unwrap_err();
    assert!(err.to_string().contains("martingale"));

    let err = rt
        .block_on(backtest::run(ctx, make_args("momentum", vec!["shortLookback".to_string()])))
        .unwrap_err();
    assert!(err.to_string().contains("name=value"));
}

#[test]
fn build_portfolio_respects_position_floor() {
    let rt = runtime();
    let ctx = context(&[("MIN_POSITION", "0.05"), ("RISK_PROFILE", "aggressive")]);
    let analysis = rt
        .block_on(build_portfolio::run(&ctx, &[], Some(date(2023, 6, 30))))
        .unwrap();

    assert!(!analysis.assets.is_empty());
    let total: f64 = analysis.assets.iter().map(|a| a.weight).sum();
    assert!(total <= 1.0 + 1e-9);
    assert!(analysis.assets.iter().all(|a| a.weight >= 0.05));
    let aaa = analysis.assets.iter().find(|a| a.ticker == "AAA").unwrap();
    assert_eq!(aaa.signal, SignalDirection::Bullish);
}

#[test]
fn analyze_portfolio_keeps_given_weights() {
    let rt = runtime();
    let ctx = context(&[]);
    let analysis = rt
        .block_on(analyze_portfolio::run(&ctx, "aaa:0.7, ZZZ:0.3", None))
        .unwrap();

    assert_eq!(analysis.assets.len(), 2);
    let aaa = analysis.assets.iter().find(|a| a.ticker == "AAA").unwrap();
    let zzz = analysis.assets.iter().find(|a| a.ticker == "ZZZ").unwrap();
    assert!((aaa.weight - 0.7).abs() < 1e-12);
    assert!((zzz.weight - 0.3).abs() < 1e-12);
    assert_eq!(zzz.sector, "Unknown");
    assert_eq!(zzz.signal, SignalDirection::Neutral);
}
