//! 时区感知的滚动日期区间
//!
//! 所有日期都是日历日（无时间分量），"今天"由品牌时区决定。

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};
use tracing::warn;

use crate::errors::{ReportingError, Result};

/// 闭区间 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(ReportingError::validation(format!(
                "Invalid date range: start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// 区间包含的天数
    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// 紧邻的前一个等长区间（无间隙、无重叠）
    pub fn previous_period(&self) -> Result<Self> {
        let len = self.len_days();
        let end = self
            .start
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ReportingError::validation("Compare range underflows"))?;
        let start = end
            .checked_sub_days(Days::new(len - 1))
            .ok_or_else(|| ReportingError::validation("Compare range underflows"))?;
        Ok(Self { start, end })
    }

    /// 相同日历日，向前平移一年（2 月 29 日落到 2 月 28 日）
    pub fn previous_year(&self) -> Result<Self> {
        let shift = |d: NaiveDate| {
            d.checked_sub_months(Months::new(12))
                .ok_or_else(|| ReportingError::validation("Compare range underflows"))
        };
        Ok(Self {
            start: shift(self.start)?,
            end: shift(self.end)?,
        })
    }

    /// 严格早于 `today` 的部分；整个区间都不早于今天时返回 None
    pub fn closed_part(&self, today: NaiveDate) -> Option<Self> {
        if self.start >= today {
            return None;
        }
        let yesterday = today.pred_opt()?;
        Some(Self {
            start: self.start,
            end: self.end.min(yesterday),
        })
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 解析 IANA 时区，无效时回退到 UTC
pub fn parse_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "Invalid IANA timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// `now` 在给定时区的日历日
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// 以时区内的"今天"为结尾、长度为 `days` 的闭区间
pub fn build_rolling_range(days: u32, timezone: &str, now: DateTime<Utc>) -> Result<DateRange> {
    if days == 0 {
        return Err(ReportingError::validation(
            "Rolling range must span at least one day",
        ));
    }
    let end = today_in(parse_timezone(timezone), now);
    let start = end
        .checked_sub_days(Days::new(u64::from(days) - 1))
        .ok_or_else(|| ReportingError::validation("Rolling range underflows"))?;
    Ok(DateRange { start, end })
}

/// 区间是否延伸到时区内的"今天"或之后（开放区间，数据仍在累积）
pub fn range_touches_today(range: &DateRange, timezone: &str, now: DateTime<Utc>) -> bool {
    range.end >= today_in(parse_timezone(timezone), now)
}

/// 命名日期预设
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RangePreset {
    Today,
    Yesterday,
    #[serde(rename = "last_7_days")]
    #[strum(serialize = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_14_days")]
    #[strum(serialize = "last_14_days")]
    Last14Days,
    #[serde(rename = "last_28_days")]
    #[strum(serialize = "last_28_days")]
    Last28Days,
    #[serde(rename = "last_30_days")]
    #[strum(serialize = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    #[strum(serialize = "last_90_days")]
    Last90Days,
}

impl RangePreset {
    pub fn expand(&self, timezone: &str, now: DateTime<Utc>) -> Result<DateRange> {
        match self {
            RangePreset::Today => build_rolling_range(1, timezone, now),
            RangePreset::Yesterday => {
                let today = today_in(parse_timezone(timezone), now);
                let yesterday = today
                    .pred_opt()
                    .ok_or_else(|| ReportingError::validation("Date underflow"))?;
                Ok(DateRange {
                    start: yesterday,
                    end: yesterday,
                })
            }
            RangePreset::Last7Days => build_rolling_range(7, timezone, now),
            RangePreset::Last14Days => build_rolling_range(14, timezone, now),
            RangePreset::Last28Days => build_rolling_range(28, timezone, now),
            RangePreset::Last30Days => build_rolling_range(30, timezone, now),
            RangePreset::Last90Days => build_rolling_range(90, timezone, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_rolling_range_uses_timezone_today() {
        // 2026-01-19 23:30 UTC 在东京已经是 1 月 20 日
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 23, 30, 0).unwrap();
        let tokyo = build_rolling_range(7, "Asia/Tokyo", now).unwrap();
        assert_eq!(tokyo.end, d("2026-01-20"));
        assert_eq!(tokyo.start, d("2026-01-14"));

        let utc = build_rolling_range(7, "UTC", now).unwrap();
        assert_eq!(utc.end, d("2026-01-19"));
        assert_eq!(utc.len_days(), 7);
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 23, 30, 0).unwrap();
        let range = build_rolling_range(1, "Mars/Olympus", now).unwrap();
        assert_eq!(range, DateRange::new(d("2026-01-19"), d("2026-01-19")).unwrap());
    }

    #[test]
    fn test_zero_days_rejected() {
        let now = Utc::now();
        assert!(build_rolling_range(0, "UTC", now).is_err());
    }

    #[test]
    fn test_range_touches_today() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 12, 0, 0).unwrap();
        let open = DateRange::new(d("2026-01-13"), d("2026-01-19")).unwrap();
        let closed = DateRange::new(d("2026-01-01"), d("2026-01-18")).unwrap();
        assert!(range_touches_today(&open, "UTC", now));
        assert!(!range_touches_today(&closed, "UTC", now));
        // 洛杉矶还在 1 月 19 日凌晨，1 月 18 日之前的区间依然闭合
        assert!(!range_touches_today(&closed, "America/Los_Angeles", now));
        let future = DateRange::new(d("2026-01-20"), d("2026-01-25")).unwrap();
        assert!(range_touches_today(&future, "UTC", now));
    }

    #[test]
    fn test_previous_period_is_adjacent() {
        let range = DateRange::new(d("2026-01-10"), d("2026-01-19")).unwrap();
        let prev = range.previous_period().unwrap();
        assert_eq!(prev, DateRange::new(d("2025-12-31"), d("2026-01-09")).unwrap());
        assert_eq!(prev.len_days(), 10);
    }

    #[test]
    fn test_previous_year_same_calendar_days() {
        let range = DateRange::new(d("2026-02-01"), d("2026-02-28")).unwrap();
        assert_eq!(
            range.previous_year().unwrap(),
            DateRange::new(d("2025-02-01"), d("2025-02-28")).unwrap()
        );

        let leap = DateRange::new(d("2024-02-29"), d("2024-02-29")).unwrap();
        assert_eq!(leap.previous_year().unwrap().start, d("2023-02-28"));
    }

    #[test]
    fn test_closed_part() {
        let range = DateRange::new(d("2026-01-10"), d("2026-01-19")).unwrap();
        assert_eq!(
            range.closed_part(d("2026-01-19")),
            Some(DateRange::new(d("2026-01-10"), d("2026-01-18")).unwrap())
        );
        assert_eq!(range.closed_part(d("2026-01-10")), None);
        assert_eq!(range.closed_part(d("2026-02-01")), Some(range));
    }

    #[test]
    fn test_presets() {
        let now = Utc.with_ymd_and_hms(2026, 1, 19, 12, 0, 0).unwrap();
        let preset = RangePreset::from_str("last_28_days").unwrap();
        let range = preset.expand("UTC", now).unwrap();
        assert_eq!(range.len_days(), 28);
        assert_eq!(range.end, d("2026-01-19"));

        let yesterday = RangePreset::Yesterday.expand("UTC", now).unwrap();
        assert_eq!(yesterday.start, d("2026-01-18"));
        assert_eq!(yesterday.end, d("2026-01-18"));

        let parsed: RangePreset = serde_json::from_str("\"last_7_days\"").unwrap();
        assert_eq!(parsed, RangePreset::Last7Days);
        assert_eq!(RangePreset::Last90Days.as_ref(), "last_90_days");
    }
}
