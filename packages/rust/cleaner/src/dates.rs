//! Posting-date text → calendar date, relative to when the page was fetched.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc};
use regex::Regex;

/// Listing sites quote dates in China Standard Time.
const SOURCE_UTC_OFFSET_SECS: i32 = 8 * 3600;

static FULL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})").expect("full date regex")
});

static MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*[-/月]\s*(\d{1,2})").expect("month-day regex"));

static DAYS_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*天前").expect("days-ago regex"));

static WEEKS_AGO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*周前").expect("weeks-ago regex"));

static SAME_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"今天|刚刚|\d+\s*(?:分钟|小时)前").expect("same-day regex"));

/// The calendar date at the source when `fetched_at` happened.
pub fn local_fetch_date(fetched_at: DateTime<Utc>) -> NaiveDate {
    FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS)
        .map(|tz| fetched_at.with_timezone(&tz).date_naive())
        .unwrap_or_else(|| fetched_at.date_naive())
}

/// Parse a posting date.
///
/// Absolute forms: `2024-05-01`, `2024/05/01`, `2024年5月1日`, and a
/// timestamp prefix like `2024-05-01 10:12:00`. Year-less forms `5月1日` and
/// `05-01` take the fetch year, or the previous year when that would put the
/// date in the future. Relative forms `今天`, `刚刚`, `N小时前`, `昨天`, `前天`,
/// `N天前`, and `N周前` count back from the fetch date.
pub fn parse_posted_date(text: &str, fetched_at: DateTime<Utc>) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let today = local_fetch_date(fetched_at);

    if let Some(caps) = FULL_DATE.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if SAME_DAY.is_match(text) {
        return Some(today);
    }
    if text.contains("前天") {
        return today.checked_sub_days(Days::new(2));
    }
    if text.contains("昨天") {
        return today.checked_sub_days(Days::new(1));
    }
    if let Some(caps) = DAYS_AGO.captures(text) {
        return today.checked_sub_days(Days::new(caps[1].parse().ok()?));
    }
    if let Some(caps) = WEEKS_AGO.captures(text) {
        let weeks: u64 = caps[1].parse().ok()?;
        return today.checked_sub_days(Days::new(weeks.checked_mul(7)?));
    }
    if let Some(caps) = MONTH_DAY.captures(text) {
        let month = caps[1].parse().ok()?;
        let day = caps[2].parse().ok()?;
        let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        return if this_year > today {
            NaiveDate::from_ymd_opt(today.year() - 1, month, day)
        } else {
            Some(this_year)
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fetched() -> DateTime<Utc> {
        // 2024-05-10 09:30 in Shanghai.
        Utc.with_ymd_and_hms(2024, 5, 10, 1, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn absolute_dates() {
        assert_eq!(parse_posted_date("2024-05-01", fetched()), date(2024, 5, 1));
        assert_eq!(parse_posted_date("2024/5/1", fetched()), date(2024, 5, 1));
        assert_eq!(parse_posted_date("2024年5月1日", fetched()), date(2024, 5, 1));
        assert_eq!(parse_posted_date("2024-05-02 10:12:00", fetched()), date(2024, 5, 2));
        assert_eq!(parse_posted_date("2024-02-30", fetched()), None);
    }

    #[test]
    fn relative_dates() {
        assert_eq!(parse_posted_date("今天", fetched()), date(2024, 5, 10));
        assert_eq!(parse_posted_date("3小时前", fetched()), date(2024, 5, 10));
        assert_eq!(parse_posted_date("刚刚", fetched()), date(2024, 5, 10));
        assert_eq!(parse_posted_date("昨天", fetched()), date(2024, 5, 9));
        assert_eq!(parse_posted_date("前天", fetched()), date(2024, 5, 8));
        assert_eq!(parse_posted_date("3天前", fetched()), date(2024, 5, 7));
        assert_eq!(parse_posted_date("2周前", fetched()), date(2024, 4, 26));
    }

    #[test]
    fn year_less_dates_roll_back_when_in_future() {
        assert_eq!(parse_posted_date("5月1日", fetched()), date(2024, 5, 1));
        assert_eq!(parse_posted_date("05-01", fetched()), date(2024, 5, 1));
        assert_eq!(parse_posted_date("12月30日", fetched()), date(2023, 12, 30));
    }

    #[test]
    fn fetch_date_uses_source_timezone() {
        // 17:00 UTC is already the next day in Shanghai.
        let late = Utc.with_ymd_and_hms(2024, 5, 10, 17, 0, 0).unwrap();
        assert_eq!(local_fetch_date(late), NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
        assert_eq!(parse_posted_date("今天", late), date(2024, 5, 11));
    }

    #[test]
    fn unknown_text_is_none() {
        assert_eq!(parse_posted_date("", fetched()), None);
        assert_eq!(parse_posted_date("最近发布", fetched()), None);
    }
}
