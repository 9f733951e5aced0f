use crate::config::RebalanceFrequency;
use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Every 5th business day counts as a weekly rebalance.
const WEEKLY_STRIDE: usize = 5;
const QUARTER_START_MONTHS: [u32; 4] = [1, 4, 7, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledDate {
    pub date: NaiveDate,
    pub index: usize,
    pub rebalance: bool,
}

/// Mon-Fri dates in `[start, end]`. No holiday calendar.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        current += Duration::days(1);
    }
    dates
}

/// Simulation dates with rebalance flags. A pure function of its arguments.
///
/// The first date always rebalances (initial allocation). Monthly and
/// quarterly cadences fire on the first business day of a new month
/// (quarterly only for Jan/Apr/Jul/Oct); weekly fires on every 5th date.
pub fn schedule(
    start: NaiveDate,
    end: NaiveDate,
    frequency: RebalanceFrequency,
) -> Vec<ScheduledDate> {
    let dates = business_days(start, end);
    let mut scheduled = Vec::with_capacity(dates.len());
    let mut previous: Option<NaiveDate> = None;

    for (index, date) in dates.into_iter().enumerate() {
        let opens_month = previous
            .map(|prev| prev.month() != date.month() || prev.year() != date.year())
            .unwrap_or(true);
        let rebalance = index == 0
            || match frequency {
                RebalanceFrequency::Weekly => index % WEEKLY_STRIDE == 0,
                RebalanceFrequency::Monthly => opens_month,
                RebalanceFrequency::Quarterly => {
                    opens_month && QUARTER_START_MONTHS.contains(&date.month())
                }
            };
        scheduled.push(ScheduledDate {
            date,
            index,
            rebalance,
        });
        previous = Some(date);
    }

    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rebalance_dates(entries: &[ScheduledDate]) -> Vec<NaiveDate> {
        entries
            .iter()
            .filter(|entry| entry.rebalance)
            .map(|entry| entry.date)
            .collect()
    }

    #[test]
    fn monthly_first_quarter_2024() {
        let entries = schedule(
            date(2024, 1, 1),
            date(2024, 3, 31),
            RebalanceFrequency::Monthly,
        );
        // Jan 23 + Feb 21 + Mar 21 business days.
        assert_eq!(entries.len(), 65);
        assert_eq!(
            rebalance_dates(&entries),
            vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]
        );
    }

    #[test]
    fn monthly_uses_first_business_day_when_first_is_weekend() {
        // 2024-06-01 is a Saturday.
        let entries = schedule(
            date(2024, 5, 15),
            date(2024, 6, 30),
            RebalanceFrequency::Monthly,
        );
        assert_eq!(
            rebalance_dates(&entries),
            vec![date(2024, 5, 15), date(2024, 6, 3)]
        );
    }

    #[test]
    fn weekly_fires_every_fifth_index() {
        let entries = schedule(
            date(2024, 1, 1),
            date(2024, 1, 31),
            RebalanceFrequency::Weekly,
        );
        let indices: Vec<usize> = entries
            .iter()
            .filter(|entry| entry.rebalance)
            .map(|entry| entry.index)
            .collect();
        assert_eq!(indices, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn quarterly_only_on_quarter_openings() {
        let entries = schedule(
            date(2024, 2, 10),
            date(2024, 12, 31),
            RebalanceFrequency::Quarterly,
        );
        assert_eq!(
            rebalance_dates(&entries),
            vec![
                date(2024, 2, 12),
                date(2024, 4, 1),
                date(2024, 7, 1),
                date(2024, 10, 1)
            ]
        );
    }

    #[test]
    fn schedule_is_deterministic() {
        let a = schedule(
            date(2023, 1, 1),
            date(2024, 12, 31),
            RebalanceFrequency::Weekly,
        );
        let b = schedule(
            date(2023, 1, 1),
            date(2024, 12, 31),
            RebalanceFrequency::Weekly,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(business_days(date(2024, 2, 1), date(2024, 1, 1)).is_empty());
        assert!(schedule(
            date(2024, 2, 1),
            date(2024, 1, 1),
            RebalanceFrequency::Monthly
        )
        .is_empty());
    }

    #[test]
    fn weekends_are_skipped() {
        // 2024-01-06/07 is a weekend.
        let days = business_days(date(2024, 1, 5), date(2024, 1, 8));
        assert_eq!(days, vec![date(2024, 1, 5), date(2024, 1, 8)]);
    }
}
