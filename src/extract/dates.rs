//! Date and period extraction.
//!
//! Recognizes numeric dates, month-name forms and relative expressions.
//! Every candidate carries the byte span it matched (for overlap
//! resolution) and the date range it denotes; point dates denote a
//! single-day range.

use chrono::{Months, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

use super::DateRange;

static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("invalid regex"));

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("invalid regex"));

static MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(janeiro|fevereiro|mar[çc]o|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)\s+de\s+(\d{4})\b",
    )
    .expect("invalid regex")
});

static RELATIVE_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[uú]ltim[oa]s?\s+(?:(\d+)\s+)?(dias?|meses|m[eê]s|anos?)\b")
        .expect("invalid regex")
});

static BARE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("invalid regex"));

/// A date expression found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateCandidate {
    /// Byte offset of the match start
    pub start: usize,
    /// Byte offset of the match end
    pub end: usize,
    /// The period the expression denotes
    pub range: DateRange,
}

fn month_number(name: &str) -> Option<u32> {
    let folded = super::fold_for_matching(name);
    let n = match folded.as_str() {
        "janeiro" => 1,
        "fevereiro" => 2,
        "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(n)
}

fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start
        .checked_add_months(Months::new(1))?
        .pred_opt()?;
    DateRange::new(start, end)
}

fn year_range(year: i32) -> Option<DateRange> {
    DateRange::new(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    )
}

/// Find every date expression in the text.
///
/// Relative expressions ("últimos 6 meses") are anchored at `reference`.
/// Expressions nested inside a longer one (the year inside `12/03/2024`)
/// are dropped in favor of the longer match.
pub fn find_dates(text: &str, reference: NaiveDate) -> Vec<DateCandidate> {
    let mut candidates = Vec::new();

    for caps in NUMERIC_DATE.captures_iter(text) {
        let m = caps.get(0).expect("full match");
        let (day, month, year) = (
            caps[1].parse::<u32>().unwrap_or(0),
            caps[2].parse::<u32>().unwrap_or(0),
            caps[3].parse::<i32>().unwrap_or(0),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(range) = DateRange::new(date, date) {
                candidates.push(DateCandidate {
                    start: m.start(),
                    end: m.end(),
                    range,
                });
            }
        }
    }

    for caps in ISO_DATE.captures_iter(text) {
        let m = caps.get(0).expect("full match");
        let (year, month, day) = (
            caps[1].parse::<i32>().unwrap_or(0),
            caps[2].parse::<u32>().unwrap_or(0),
            caps[3].parse::<u32>().unwrap_or(0),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(range) = DateRange::new(date, date) {
                candidates.push(DateCandidate {
                    start: m.start(),
                    end: m.end(),
                    range,
                });
            }
        }
    }

    for caps in MONTH_YEAR.captures_iter(text) {
        let m = caps.get(0).expect("full match");
        let year = caps[2].parse::<i32>().unwrap_or(0);
        if let Some(month) = month_number(&caps[1]) {
            if let Some(range) = month_range(year, month) {
                candidates.push(DateCandidate {
                    start: m.start(),
                    end: m.end(),
                    range,
                });
            }
        }
    }

    for caps in RELATIVE_PERIOD.captures_iter(text) {
        let m = caps.get(0).expect("full match");
        let count: u32 = caps
            .get(1)
            .and_then(|c| c.as_str().parse().ok())
            .unwrap_or(1);
        let unit = super::fold_for_matching(&caps[2]);
        let start = if unit.starts_with("dia") {
            reference.checked_sub_days(chrono::Days::new(u64::from(count)))
        } else if unit.starts_with("mes") || unit.starts_with("meses") {
            reference.checked_sub_months(Months::new(count))
        } else {
            reference.checked_sub_months(Months::new(count.saturating_mul(12)))
        };
        if let Some(start) = start {
            if let Some(range) = DateRange::new(start, reference) {
                candidates.push(DateCandidate {
                    start: m.start(),
                    end: m.end(),
                    range,
                });
            }
        }
    }

    for caps in BARE_YEAR.captures_iter(text) {
        let m = caps.get(0).expect("full match");
        let year = caps[1].parse::<i32>().unwrap_or(0);
        if let Some(range) = year_range(year) {
            candidates.push(DateCandidate {
                start: m.start(),
                end: m.end(),
                range,
            });
        }
    }

    // Longest-match-wins between date candidates themselves: drop any
    // candidate contained in a longer one.
    let mut kept: Vec<DateCandidate> = Vec::new();
    candidates.sort_by(|a, b| (b.end - b.start).cmp(&(a.end - a.start)).then(a.start.cmp(&b.start)));
    for candidate in candidates {
        let covered = kept
            .iter()
            .any(|k| candidate.start >= k.start && candidate.end <= k.end);
        if !covered {
            kept.push(candidate);
        }
    }
    kept.sort_by_key(|c| c.start);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_numeric_date() {
        let found = find_dates("contratos assinados em 15/03/2024", date(2025, 1, 1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 3, 15));
        assert_eq!(found[0].range.end, date(2024, 3, 15));
    }

    #[test]
    fn test_iso_date() {
        let found = find_dates("desde 2024-01-15", date(2025, 1, 1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 1, 15));
    }

    #[test]
    fn test_invalid_calendar_date_rejected() {
        let found = find_dates("em 31/02/2024", date(2025, 1, 1));
        // The bare year survives; the impossible day/month does not parse.
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range, DateRange::new(date(2024, 1, 1), date(2024, 12, 31)).unwrap());
    }

    #[test]
    fn test_month_name_form() {
        let found = find_dates("gastos de outubro de 2024", date(2025, 1, 1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 10, 1));
        assert_eq!(found[0].range.end, date(2024, 10, 31));
    }

    #[test]
    fn test_relative_months() {
        let reference = date(2024, 10, 15);
        let found = find_dates("nos últimos 6 meses", reference);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 4, 15));
        assert_eq!(found[0].range.end, reference);
    }

    #[test]
    fn test_relative_without_count() {
        let reference = date(2024, 10, 15);
        let found = find_dates("no último ano", reference);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2023, 10, 15));
    }

    #[test]
    fn test_bare_year_becomes_year_range() {
        let found = find_dates("contratos de 2024", date(2025, 1, 1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 1, 1));
        assert_eq!(found[0].range.end, date(2024, 12, 31));
    }

    #[test]
    fn test_year_inside_full_date_not_doubled() {
        let found = find_dates("em 15/03/2024", date(2025, 1, 1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].range.start, date(2024, 3, 15));
    }

    #[test]
    fn test_determinism() {
        let a = find_dates("de janeiro de 2023 a 31/12/2024", date(2025, 6, 1));
        let b = find_dates("de janeiro de 2023 a 31/12/2024", date(2025, 6, 1));
        assert_eq!(a, b);
    }
}
