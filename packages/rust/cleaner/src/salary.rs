//! Salary text → monthly yuan range.

use std::sync::LazyLock;

use regex::Regex;

use jobpulse_shared::SalaryRange;

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([kK千万wW]?)\s*(?:-|~|至|到)\s*(\d+(?:\.\d+)?)\s*([kK千万wW]?)")
        .expect("salary range regex")
});

static SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([kK千万wW])").expect("salary single regex"));

/// Parse a salary string into a monthly range.
///
/// Accepts `15k-25k`, `15-25K`, `1.5-2.5万`, `15000-25000元/月`, `20-30万/年`,
/// `年薪20-30万`, `15-25k·13薪`, and a single `20k`. Annual figures are divided
/// by 12. Negotiable (`面议`), daily or hourly pay, and unparseable text give
/// `None`.
pub fn parse_salary(text: &str) -> Option<SalaryRange> {
    let text = text.trim();
    if text.is_empty() || text.contains("面议") || is_per_day_or_hour(text) {
        return None;
    }

    let (min, max, min_unit, max_unit) = if let Some(caps) = RANGE.captures(text) {
        (
            caps[1].parse::<f64>().ok()?,
            caps[3].parse::<f64>().ok()?,
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(4).map_or("", |m| m.as_str()),
        )
    } else {
        let caps = SINGLE.captures(text)?;
        let value = caps[1].parse::<f64>().ok()?;
        let unit = caps.get(2).map_or("", |m| m.as_str());
        (value, value, unit, unit)
    };

    // `15-25K` quotes the unit once, after the upper bound.
    let max_mult = multiplier(max_unit).or_else(|| fallback_multiplier(text)).unwrap_or(1.0);
    let min_mult = multiplier(min_unit).unwrap_or(max_mult);

    let annualized = text.contains("/年") || text.contains("年薪") || text.contains("每年");
    let divisor = if annualized { 12.0 } else { 1.0 };

    let low = (min * min_mult / divisor).round();
    let high = (max * max_mult / divisor).round();
    if !(low.is_finite() && high.is_finite()) || low <= 0.0 || high <= 0.0 || high > f64::from(u32::MAX) {
        return None;
    }
    let (low, high) = if low <= high { (low, high) } else { (high, low) };

    Some(SalaryRange {
        min_monthly: low as u32,
        max_monthly: high as u32,
        annualized,
    })
}

fn multiplier(unit: &str) -> Option<f64> {
    match unit {
        "k" | "K" | "千" => Some(1_000.0),
        "万" | "w" | "W" => Some(10_000.0),
        _ => None,
    }
}

/// Unit named elsewhere in the text, e.g. `15-25 千/月`.
fn fallback_multiplier(text: &str) -> Option<f64> {
    if text.contains('万') {
        Some(10_000.0)
    } else if text.contains('千') || text.to_lowercase().contains('k') {
        Some(1_000.0)
    } else {
        None
    }
}

fn is_per_day_or_hour(text: &str) -> bool {
    ["/天", "/日", "元/时", "/小时", "每天"]
        .iter()
        .any(|marker| text.contains(marker))
}
