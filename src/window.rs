use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WindowError;
use crate::models::LogRecord;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ReportPeriod {
    pub fn label(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "daily",
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
            ReportPeriod::Custom => "custom",
        }
    }

    /// Days before `end` at which the window starts, when no start is given
    fn lookback_days(&self) -> Option<u64> {
        match self {
            ReportPeriod::Daily => Some(0),
            ReportPeriod::Weekly => Some(6),
            ReportPeriod::Monthly => Some(29),
            ReportPeriod::Custom => None,
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReportPeriod {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            "custom" => Ok(ReportPeriod::Custom),
            _ => Err(WindowError::UnknownPeriod(s.to_string())),
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, WindowError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| WindowError::InvalidDate {
        value: value.to_string(),
    })
}

/// Inclusive date range a report covers, at day granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period: ReportPeriod,
}

impl ReportWindow {
    pub fn new(start: NaiveDate, end: NaiveDate, period: ReportPeriod) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end, period })
    }

    /// Fills in missing bounds from the period. `end` defaults to the day
    /// before `today`; explicit dates always win.
    pub fn resolve(
        period: ReportPeriod,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Self, WindowError> {
        if period == ReportPeriod::Custom && (start.is_none() || end.is_none()) {
            return Err(WindowError::IncompleteCustomWindow);
        }

        let end = end.unwrap_or_else(|| today.pred_opt().unwrap_or(today));
        let start = match (start, period.lookback_days()) {
            (Some(start), _) => start,
            (None, Some(days)) => end.checked_sub_days(Days::new(days)).unwrap_or(end),
            (None, None) => return Err(WindowError::IncompleteCustomWindow),
        };

        Self::new(start, end, period)
    }

    /// True when the timestamp falls on a UTC calendar day inside the window
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let day = timestamp.date_naive();
        day >= self.start && day <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Keeps the records inside the window, in their original order
    pub fn filter<'a, I>(&'a self, records: I) -> impl Iterator<Item = LogRecord> + 'a
    where
        I: IntoIterator<Item = LogRecord>,
        I::IntoIter: 'a,
    {
        records
            .into_iter()
            .filter(move |record| self.contains(&record.timestamp))
    }
}

/// Window as requested over HTTP: every part optional, dates as text
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl WindowQuery {
    pub fn resolve(
        &self,
        default_period: ReportPeriod,
        today: NaiveDate,
    ) -> Result<ReportWindow, WindowError> {
        let period = match self.period.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(raw) => raw.parse()?,
            None => default_period,
        };
        let start = optional_date(self.start_date.as_deref())?;
        let end = optional_date(self.end_date.as_deref())?;
        ReportWindow::resolve(period, start, end, today)
    }
}

fn optional_date(value: Option<&str>) -> Result<Option<NaiveDate>, WindowError> {
    match value {
        Some(raw) if !raw.trim().is_empty() => parse_date(raw).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record_at(timestamp: DateTime<Utc>, message: &str) -> LogRecord {
        LogRecord {
            timestamp,
            level: Level::Info,
            logger: "app".to_string(),
            message: message.to_string(),
            cid: None,
            user: "-".to_string(),
            task_name: None,
            client_ip: None,
            schema_version: None,
        }
    }

    #[test]
    fn test_end_day_is_inclusive() {
        let window = ReportWindow::new(date(2025, 1, 1), date(2025, 1, 7), ReportPeriod::Custom).unwrap();

        let last_second = Utc.with_ymd_and_hms(2025, 1, 7, 23, 59, 59).unwrap();
        let next_day = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        let first_second = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        assert!(window.contains(&last_second));
        assert!(window.contains(&first_second));
        assert!(!window.contains(&next_day));
    }

    #[test]
    fn test_filter_preserves_order() {
        let window = ReportWindow::new(date(2025, 1, 1), date(2025, 1, 2), ReportPeriod::Custom).unwrap();
        let records = vec![
            record_at(Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap(), "b"),
            record_at(Utc.with_ymd_and_hms(2024, 12, 31, 10, 0, 0).unwrap(), "out"),
            record_at(Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(), "a"),
        ];

        let kept: Vec<String> = window.filter(records).map(|r| r.message).collect();
        assert_eq!(kept, vec!["b", "a"]);
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let err = ReportWindow::new(date(2025, 1, 8), date(2025, 1, 7), ReportPeriod::Custom).unwrap_err();
        assert!(matches!(err, WindowError::StartAfterEnd { .. }));
    }

    #[test]
    fn test_resolve_period_defaults() {
        let today = date(2025, 3, 10);

        let daily = ReportWindow::resolve(ReportPeriod::Daily, None, None, today).unwrap();
        assert_eq!((daily.start, daily.end), (date(2025, 3, 9), date(2025, 3, 9)));

        let weekly = ReportWindow::resolve(ReportPeriod::Weekly, None, None, today).unwrap();
        assert_eq!((weekly.start, weekly.end), (date(2025, 3, 3), date(2025, 3, 9)));
        assert_eq!(weekly.days(), 7);

        let monthly = ReportWindow::resolve(ReportPeriod::Monthly, None, None, today).unwrap();
        assert_eq!(monthly.start, date(2025, 2, 8));
        assert_eq!(monthly.days(), 30);
    }

    #[test]
    fn test_explicit_dates_win() {
        let today = date(2025, 3, 10);
        let window =
            ReportWindow::resolve(ReportPeriod::Weekly, None, Some(date(2025, 1, 7)), today).unwrap();
        assert_eq!(window.start, date(2025, 1, 1));
        assert_eq!(window.end, date(2025, 1, 7));
    }

    #[test]
    fn test_custom_requires_both_dates() {
        let today = date(2025, 3, 10);
        let err = ReportWindow::resolve(ReportPeriod::Custom, Some(date(2025, 1, 1)), None, today)
            .unwrap_err();
        assert_eq!(err, WindowError::IncompleteCustomWindow);
    }

    #[test]
    fn test_query_resolution() {
        let today = date(2025, 3, 10);
        let query = WindowQuery {
            period: Some("Custom".to_string()),
            start_date: Some("2025-01-01".to_string()),
            end_date: Some("2025-01-07".to_string()),
        };
        let window = query.resolve(ReportPeriod::Daily, today).unwrap();
        assert_eq!(window.period, ReportPeriod::Custom);
        assert_eq!(window.days(), 7);

        let bad_date = WindowQuery {
            start_date: Some("01/02/2025".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_date.resolve(ReportPeriod::Daily, today),
            Err(WindowError::InvalidDate { .. })
        ));

        let bad_period = WindowQuery {
            period: Some("hourly".to_string()),
            ..Default::default()
        };
        assert_eq!(
            bad_period.resolve(ReportPeriod::Daily, today).unwrap_err(),
            WindowError::UnknownPeriod("hourly".to_string())
        );
    }

    #[test]
    fn test_missing_period_uses_default() {
        let today = date(2025, 3, 10);
        let window = WindowQuery::default().resolve(ReportPeriod::Weekly, today).unwrap();
        assert_eq!(window.period, ReportPeriod::Weekly);
        assert_eq!(window.days(), 7);
    }
}
