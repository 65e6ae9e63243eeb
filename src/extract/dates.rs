//! Tolerant publish-date parsing.
//!
//! Dates arrive as ISO timestamps in `<time datetime>` attributes, as
//! RFC 2822 strings in feeds, and as human text such as
//! `Oct. 16, 2026, 5 a.m. EDT`. Time zone abbreviations are dropped and
//! the result is treated as UTC; day precision is all the poller needs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TZ_ABBREVIATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:EDT|EST|CDT|CST|MDT|MST|PDT|PST|UTC|GMT|ET|PT)\b").unwrap()
});

static MERIDIEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b([ap])\.?m\.?").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%B %d, %Y, %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y, %I:%M %p",
    "%b %d, %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%m/%d/%Y"];

/// Parse a date string in any of the formats news sites commonly use.
pub fn parse_loose_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let cleaned = normalize(raw);

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(date) = parse_date_only(&cleaned) {
        return Some(date);
    }

    // "Oct 16, 2026, 5 AM": keep the first two comma-separated parts.
    let mut parts = cleaned.splitn(3, ',');
    if let (Some(a), Some(b)) = (parts.next(), parts.next()) {
        return parse_date_only(&format!("{},{}", a, b));
    }
    None
}

/// Build a date from numeric path components such as `/2025/05/23/`.
pub fn date_from_parts(year: &str, month: &str, day: Option<&str>) -> Option<DateTime<Utc>> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = match day {
        Some(d) => d.parse().ok()?,
        None => 1,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn parse_date_only(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

fn normalize(raw: &str) -> String {
    let s = TZ_ABBREVIATION.replace_all(raw, "");
    let s = MERIDIEM.replace_all(&s, |caps: &regex::Captures| {
        format!("{}M", caps[1].to_ascii_uppercase())
    });
    let s = s.replace("Sept.", "Sep").replace("Sept ", "Sep ").replace('.', "");
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    s.trim_end_matches(',').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_iso_with_offset() {
        let dt = parse_loose_date("2026-10-16T09:30:00-04:00").unwrap();
        assert_eq!(dt.hour(), 13);
        assert_eq!(dt.day(), 16);
    }

    #[test]
    fn test_rfc2822() {
        let dt = parse_loose_date("Fri, 16 Oct 2026 09:30:00 +0000").unwrap();
        assert_eq!(dt.month(), 10);
    }

    #[test]
    fn test_human_text_with_meridiem_and_zone() {
        let dt = parse_loose_date("Oct. 16, 2026, 5 a.m. EDT").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2026, 10, 16));
    }

    #[test]
    fn test_human_text_with_minutes() {
        let dt = parse_loose_date("October 16, 2026, 5:45 p.m. EDT").unwrap();
        assert_eq!((dt.day(), dt.hour(), dt.minute()), (16, 17, 45));
    }

    #[test]
    fn test_plain_dates() {
        assert_eq!(parse_loose_date("May 23, 2025").unwrap().day(), 23);
        assert_eq!(parse_loose_date("Sept. 3, 2025").unwrap().month(), 9);
        assert_eq!(parse_loose_date("2025-05-23").unwrap().year(), 2025);
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(parse_loose_date("").is_none());
        assert!(parse_loose_date("yesterday-ish").is_none());
    }

    #[test]
    fn test_date_from_parts() {
        let dt = date_from_parts("2025", "05", Some("23")).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2025, 5, 23));
        assert!(date_from_parts("2025", "13", None).is_none());
    }
}
