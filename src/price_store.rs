use crate::data_context::PriceProvider;
use crate::models::PricePoint;
use chrono::NaiveDate;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Per-ticker and benchmark close series with forward-fill lookup.
///
/// Built once per run from a `PriceProvider`; tickers whose fetch fails or
/// yields nothing usable are left out rather than failing construction.
#[derive(Debug, Clone, Default)]
pub struct HistoricalPriceStore {
    series: HashMap<String, Vec<PricePoint>>,
    benchmark: Vec<PricePoint>,
}

impl HistoricalPriceStore {
    pub fn load(
        provider: &dyn PriceProvider,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        let fetched: Vec<(String, Option<Vec<PricePoint>>)> = tickers
            .par_iter()
            .map(|ticker| match provider.history(ticker, start, end) {
                Ok(points) => (ticker.clone(), Some(points)),
                Err(gap) => {
                    warn!("Could not fetch {}: {}", ticker, gap);
                    (ticker.clone(), None)
                }
            })
            .collect();

        let mut series = HashMap::with_capacity(fetched.len());
        for (ticker, points) in fetched {
            let Some(points) = points else {
                continue;
            };
            let cleaned = sanitize_series(points);
            if cleaned.is_empty() {
                warn!(
                    "No usable prices for {} between {} and {}; ticker omitted",
                    ticker, start, end
                );
                continue;
            }
            series.insert(ticker, cleaned);
        }

        let benchmark = match provider.benchmark(start, end) {
            Ok(points) => sanitize_series(points),
            Err(gap) => {
                warn!("Could not fetch benchmark: {}", gap);
                Vec::new()
            }
        };

        info!(
            "Price store ready: {}/{} tickers, {} benchmark points",
            series.len(),
            tickers.len(),
            benchmark.len()
        );

        Self { series, benchmark }
    }

    pub fn from_series(
        series: HashMap<String, Vec<PricePoint>>,
        benchmark: Vec<PricePoint>,
    ) -> Self {
        let series = series
            .into_iter()
            .map(|(ticker, points)| (ticker, sanitize_series(points)))
            .filter(|(_, points)| !points.is_empty())
            .collect();
        Self {
            series,
            benchmark: sanitize_series(benchmark),
        }
    }

    pub fn replace_benchmark(&mut self, points: Vec<PricePoint>) {
        self.benchmark = sanitize_series(points);
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.series.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn series(&self, ticker: &str) -> Option<&[PricePoint]> {
        self.series.get(ticker).map(Vec::as_slice)
    }

    /// Points at or before `date`, oldest first.
    pub fn history_until(&self, ticker: &str, date: NaiveDate) -> &[PricePoint] {
        match self.series.get(ticker) {
            Some(points) => &points[..points.partition_point(|point| point.date <= date)],
            None => &[],
        }
    }

    /// Latest known close at or before `date`.
    pub fn price_on(&self, ticker: &str, date: NaiveDate) -> Option<f64> {
        let price = self
            .series
            .get(ticker)
            .and_then(|points| latest_at_or_before(points, date));
        if price.is_none() {
            debug!("No price for {} at or before {}", ticker, date);
        }
        price
    }

    pub fn benchmark_on(&self, date: NaiveDate) -> Option<f64> {
        latest_at_or_before(&self.benchmark, date)
    }

    /// Forward-filled prices for every ticker that has one on `date`.
    pub fn prices_on(&self, tickers: &[String], date: NaiveDate) -> BTreeMap<String, f64> {
        tickers
            .iter()
            .filter_map(|ticker| {
                self.price_on(ticker, date)
                    .map(|price| (ticker.clone(), price))
            })
            .collect()
    }
}

fn latest_at_or_before(points: &[PricePoint], date: NaiveDate) -> Option<f64> {
    let idx = points.partition_point(|point| point.date <= date);
    if idx == 0 {
        None
    } else {
        Some(points[idx - 1].close)
    }
}

/// Sorts by date, keeps the last close per date and drops unusable closes.
fn sanitize_series(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.retain(|point| point.close.is_finite() && point.close > 0.0);
    points.sort_by_key(|point| point.date);
    let mut cleaned: Vec<PricePoint> = Vec::with_capacity(points.len());
    for point in points {
        match cleaned.last_mut() {
            Some(last) if last.date == point.date => *last = point,
            _ => cleaned.push(point),
        }
    }
    cleaned
}
