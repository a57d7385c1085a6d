use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const CST_OFFSET_SECS: i32 = 8 * 3600;

// SSE/SZSE close at 15:00 CST and daily bars are published shortly after; before this cutoff the
// latest complete session is the previous trading day.
const CLOSE_CUTOFF_HOUR_CST: u32 = 16;
const CLOSE_CUTOFF_MINUTE_CST: u32 = 0;

// Weekday closures of the SSE as announced. Weekends are always closed and are not listed.
const KNOWN_CLOSURES: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 1),
    (2024, 2, 9), (2024, 2, 12), (2024, 2, 13), (2024, 2, 14), (2024, 2, 15), (2024, 2, 16),
    (2024, 4, 4), (2024, 4, 5),
    (2024, 5, 1), (2024, 5, 2), (2024, 5, 3),
    (2024, 6, 10),
    (2024, 9, 16), (2024, 9, 17),
    (2024, 10, 1), (2024, 10, 2), (2024, 10, 3), (2024, 10, 4), (2024, 10, 7),
    // 2025
    (2025, 1, 1),
    (2025, 1, 28), (2025, 1, 29), (2025, 1, 30), (2025, 1, 31), (2025, 2, 3), (2025, 2, 4),
    (2025, 4, 4),
    (2025, 5, 1), (2025, 5, 2), (2025, 5, 5),
    (2025, 6, 2),
    (2025, 10, 1), (2025, 10, 2), (2025, 10, 3), (2025, 10, 6), (2025, 10, 7), (2025, 10, 8),
    // 2026
    (2026, 1, 1), (2026, 1, 2),
    (2026, 2, 16), (2026, 2, 17), (2026, 2, 18), (2026, 2, 19), (2026, 2, 20), (2026, 2, 23),
    (2026, 4, 6),
    (2026, 5, 1), (2026, 5, 4), (2026, 5, 5),
    (2026, 6, 19),
    (2026, 9, 25),
    (2026, 10, 1), (2026, 10, 2), (2026, 10, 5), (2026, 10, 6), (2026, 10, 7),
];
const LAST_KNOWN_YEAR: i32 = 2026;

/// One exchange calendar entry as published by the data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_open: bool,
}

/// Closed sessions of the A-share market.
///
/// Built from the hand-kept closure list, then the exchange calendar (authoritative where it has
/// an entry), then `CN_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD"` which always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    closed: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn builtin() -> Self {
        let mut closed: BTreeSet<NaiveDate> = KNOWN_CLOSURES
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();

        // Fixed-date closures only for years not announced yet.
        for y in (LAST_KNOWN_YEAR + 1)..=(LAST_KNOWN_YEAR + 4) {
            for (m, d) in [(1, 1), (5, 1), (10, 1), (10, 2), (10, 3)] {
                if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                    closed.insert(date);
                }
            }
        }

        Self { closed }
    }

    /// Builtin closures overlaid with exchange days and the env override.
    pub fn load(exchange_days: &[CalendarDay]) -> Self {
        let mut cal = Self::builtin();
        cal.apply_exchange_days(exchange_days);
        cal.apply_env_override();
        cal
    }

    pub fn apply_exchange_days(&mut self, days: &[CalendarDay]) {
        for day in days {
            if day.is_open {
                self.closed.remove(&day.date);
            } else {
                self.closed.insert(day.date);
            }
        }
    }

    fn apply_env_override(&mut self) {
        let Ok(s) = std::env::var("CN_MARKET_HOLIDAYS") else {
            return;
        };
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    self.closed.insert(d);
                }
                Err(_) => tracing::warn!(value = part, "ignoring invalid CN_MARKET_HOLIDAYS entry"),
            }
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.closed.contains(&date)
    }

    pub fn previous_or_same_trading_day(&self, mut date: NaiveDate) -> NaiveDate {
        while !self.is_trading_day(date) {
            date = date - Duration::days(1);
        }
        date
    }

    /// Explicit `YYYY-MM-DD` wins. Otherwise the latest session whose bars are complete at
    /// `now_utc`.
    pub fn resolve_as_of_date(
        &self,
        as_of_date_arg: Option<&str>,
        now_utc: DateTime<Utc>,
    ) -> anyhow::Result<NaiveDate> {
        if let Some(s) = as_of_date_arg {
            return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .with_context(|| format!("invalid as-of date (expected YYYY-MM-DD): {s}"));
        }

        let mut date = today_cst(now_utc)?;
        let now_cst = now_utc.with_timezone(&cst()?);
        let cutoff_reached =
            (now_cst.hour(), now_cst.minute()) >= (CLOSE_CUTOFF_HOUR_CST, CLOSE_CUTOFF_MINUTE_CST);
        if !cutoff_reached {
            date = date - Duration::days(1);
        }

        Ok(self.previous_or_same_trading_day(date))
    }
}

pub fn today_cst(now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    Ok(now_utc.with_timezone(&cst()?).date_naive())
}

/// Calendar window worth syncing around `date`: the previous and the current year.
pub fn sync_window(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(date.year() - 1, 1, 1).unwrap_or(date);
    let end = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
    (start, end)
}

fn cst() -> anyhow::Result<chrono::FixedOffset> {
    chrono::FixedOffset::east_opt(CST_OFFSET_SECS).context("invalid CST offset")
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 8, 0, 0).unwrap();
        let cal = TradingCalendar::builtin();
        assert_eq!(cal.resolve_as_of_date(Some("2026-03-04"), now).unwrap(), date(2026, 3, 4));
        assert!(cal.resolve_as_of_date(Some("20260304"), now).is_err());
    }

    #[test]
    fn rolls_back_on_weekend() {
        // 2026-03-07 is Saturday; 16:00 UTC = 00:00 CST Sunday.
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap();
        let d = TradingCalendar::builtin().resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, date(2026, 3, 6));
    }

    #[test]
    fn uses_previous_day_before_cutoff() {
        // 2026-03-09 06:00 UTC = 14:00 CST Monday, before the cutoff.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 0).unwrap();
        let d = TradingCalendar::builtin().resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, date(2026, 3, 6));
    }

    #[test]
    fn uses_same_day_after_cutoff() {
        // 2026-03-09 09:00 UTC = 17:00 CST Monday.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap();
        let d = TradingCalendar::builtin().resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, date(2026, 3, 9));
    }

    #[test]
    fn early_morning_run_targets_previous_session() {
        // 2026-03-09 18:00 UTC is 02:00 CST on Tuesday 2026-03-10, when the daily job fires.
        // That is before the cutoff, so the as-of date is the Monday session, 2026-03-09.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 18, 0, 0).unwrap();
        assert_eq!(today_cst(now).unwrap(), date(2026, 3, 10));
        let d = TradingCalendar::builtin().resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, date(2026, 3, 9));
    }

    #[test]
    fn lunar_holidays_are_closed() {
        let cal = TradingCalendar::builtin();
        // Spring Festival, Qingming, Dragon Boat, Mid-Autumn.
        for d in [date(2026, 2, 17), date(2026, 4, 6), date(2026, 6, 19), date(2026, 9, 25)] {
            assert!(!cal.is_trading_day(d), "{d} should be closed");
        }
        assert!(cal.is_trading_day(date(2026, 3, 9)));
    }

    #[test]
    fn national_day_week_rolls_back_to_september() {
        // 2026-10-06 09:00 UTC = 17:00 CST, inside the National Day closure.
        let now = Utc.with_ymd_and_hms(2026, 10, 6, 9, 0, 0).unwrap();
        let d = TradingCalendar::builtin().resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, date(2026, 9, 30));
    }

    #[test]
    fn exchange_days_override_builtin_list() {
        let mut cal = TradingCalendar::builtin();
        cal.apply_exchange_days(&[
            CalendarDay {
                date: date(2026, 2, 17),
                is_open: true,
            },
            CalendarDay {
                date: date(2027, 2, 8),
                is_open: false,
            },
        ]);
        assert!(cal.is_trading_day(date(2026, 2, 17)));
        assert!(!cal.is_trading_day(date(2027, 2, 8)));
    }

    #[test]
    fn weekends_stay_closed_even_if_exchange_says_open() {
        let mut cal = TradingCalendar::default();
        cal.apply_exchange_days(&[CalendarDay {
            date: date(2026, 3, 7),
            is_open: true,
        }]);
        assert!(!cal.is_trading_day(date(2026, 3, 7)));
    }

    #[test]
    fn sync_window_spans_previous_and_current_year() {
        assert_eq!(sync_window(date(2026, 6, 1)), (date(2025, 1, 1), date(2026, 12, 31)));
    }
}
