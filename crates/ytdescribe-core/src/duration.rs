//! Human-readable rendering of the ISO-8601 durations the videos API returns.

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?T(?:(\d+)H)?(\d+)M(\d+)S$").expect("duration pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported duration format '{input}'")]
pub struct InvalidDurationFormat {
    pub input: String,
}

/// `PT4M13S` -> `4:13`, `PT1H2M3S` -> `1:02:03`, `P1DT2H3M4S` -> `1 days 2:03:04`.
///
/// Minutes and seconds are mandatory; durations such as `PT45S` or `PT1H`
/// are rejected.
pub fn format_duration(iso: &str) -> Result<String, InvalidDurationFormat> {
    let invalid = || InvalidDurationFormat {
        input: iso.to_string(),
    };
    let caps = DURATION_RE.captures(iso).ok_or_else(invalid)?;

    let number = |idx: usize| -> Result<Option<u64>, InvalidDurationFormat> {
        caps.get(idx)
            .map(|m| m.as_str().parse::<u64>().map_err(|_| invalid()))
            .transpose()
    };

    let days = number(1)?;
    let hours = number(2)?;
    let minutes = number(3)?.ok_or_else(invalid)?;
    let seconds = number(4)?.ok_or_else(invalid)?;

    let mut out = String::new();
    if let Some(days) = days {
        out.push_str(&format!("{} days ", days));
    }
    match hours {
        Some(hours) => out.push_str(&format!("{}:{:02}:{:02}", hours, minutes, seconds)),
        None => out.push_str(&format!("{}:{:02}", minutes, seconds)),
    }
    Ok(out)
}
