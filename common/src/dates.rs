// Date extraction and age-based selection for dated filenames

use chrono::{NaiveDate, TimeDelta};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Placeholder token marking where the date sits in a service pattern
pub const DATE_PLACEHOLDER: &str = "<DATE>";

/// Older spelling of the placeholder, still accepted
pub const LEGACY_DATE_PLACEHOLDER: &str = "<DATE->";

/// Glob substituted for the placeholder: exactly `YYYY-MM-DD` shaped
pub const DATE_GLOB: &str = "????-??-??";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(20[0-9][0-9])-([0-9][0-9])-([0-9][0-9])").expect("Invalid regex pattern")
    })
}

/// Extract the first `20YY-MM-DD` date embedded in a filename
///
/// Impossible calendar dates (month 13, February 30) count as no match.
pub fn extract_date(filename: &str) -> Option<NaiveDate> {
    let caps = date_pattern().captures(filename)?;
    let year = caps[1].parse::<i32>().ok()?;
    let month = caps[2].parse::<u32>().ok()?;
    let day = caps[3].parse::<u32>().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day);
    if date.is_none() {
        debug!(filename = %filename, "Ignoring file with impossible embedded date");
    }
    date
}

/// Select files whose age relative to `today` satisfies `predicate`
///
/// Files without a date are dropped. The result is ordered oldest first,
/// ties broken by filename.
pub fn select_for_age<I, S, P>(files: I, today: NaiveDate, predicate: P) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    P: Fn(TimeDelta) -> bool,
{
    let mut selected: Vec<(NaiveDate, String)> = files
        .into_iter()
        .filter_map(|f| {
            let f = f.as_ref();
            let date = extract_date(f)?;
            predicate(today - date).then(|| (date, f.to_string()))
        })
        .collect();

    selected.sort();
    selected.into_iter().map(|(_, f)| f).collect()
}

/// Predicate matching ages strictly greater than `days` whole days
pub fn older_than(days: u32) -> impl Fn(TimeDelta) -> bool {
    move |age| age.num_days() > i64::from(days)
}

/// Whether a service pattern carries a date placeholder
pub fn contains_placeholder(pattern: &str) -> bool {
    pattern.contains(DATE_PLACEHOLDER) || pattern.contains(LEGACY_DATE_PLACEHOLDER)
}

/// Turn a service pattern into a listing glob
pub fn glob_for_pattern(pattern: &str) -> String {
    pattern
        .replace(LEGACY_DATE_PLACEHOLDER, DATE_GLOB)
        .replace(DATE_PLACEHOLDER, DATE_GLOB)
}
