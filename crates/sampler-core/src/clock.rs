use crate::ConfigError;
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// How the timestamp column of an output line is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeMode {
    /// Milliseconds since the first observed message.
    #[default]
    OffsetMillis,
    /// Microseconds since the first observed message.
    OffsetMicros,
    /// Local wall-clock time, `Www Mmm dd hh:mm:ss yyyy ZONE`.
    WallclockPosix,
    /// UTC wall-clock time in ISO-8601 basic form.
    WallclockIso8601,
}

impl TimeMode {
    pub fn is_wallclock(&self) -> bool {
        matches!(self, TimeMode::WallclockPosix | TimeMode::WallclockIso8601)
    }
}

/// The two clocks an output line may be stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReference {
    pub elapsed_us: u64,
    pub wallclock: OffsetDateTime,
}

impl TimeReference {
    pub fn new(elapsed_us: u64, wallclock: OffsetDateTime) -> Self {
        Self {
            elapsed_us,
            wallclock,
        }
    }

    /// Reference with the wall clock read now.
    pub fn elapsed(elapsed_us: u64) -> Self {
        Self::new(elapsed_us, OffsetDateTime::now_utc())
    }
}

const POSIX_TIME: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);
const POSIX_ZONE: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");
const ISO_BASIC: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second].[subsecond digits:6]");

const START_FORMATS: [&[FormatItem<'static>]; 4] = [
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year][month][day]T[hour][minute][second].[subsecond]"),
    format_description!("[year][month][day]T[hour][minute][second]"),
];

/// Render the timestamp column. `local` is the offset used for posix wall-clock
/// output; it is read once at startup since the local offset cannot be queried
/// safely once threads are running.
pub fn render_time(reference: &TimeReference, mode: TimeMode, local: UtcOffset) -> String {
    match mode {
        TimeMode::OffsetMillis => (reference.elapsed_us / 1_000).to_string(),
        TimeMode::OffsetMicros => reference.elapsed_us.to_string(),
        TimeMode::WallclockPosix => render_posix(reference.wallclock.to_offset(local)),
        TimeMode::WallclockIso8601 => render_iso8601(reference.wallclock),
    }
}

fn render_posix(t: OffsetDateTime) -> String {
    let mut out = t.format(POSIX_TIME).unwrap_or_default();
    out.push(' ');
    // `time` only knows numeric offsets, not zone abbreviations, so a
    // non-UTC zone is written as `+HH:MM`.
    if t.offset().is_utc() {
        out.push_str("UTC");
    } else {
        out.push_str(&t.offset().format(POSIX_ZONE).unwrap_or_default());
    }
    out
}

fn render_iso8601(t: OffsetDateTime) -> String {
    let mut out = t.to_offset(UtcOffset::UTC).format(ISO_BASIC).unwrap_or_default();
    out.push('Z');
    out
}

/// Parse a `--start` value: either microseconds since the Unix epoch or an
/// ISO-8601 date-time in UTC (extended or basic form, optional fraction and `Z`).
pub fn parse_start_time(input: &str) -> Result<u64, ConfigError> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse()
            .map_err(|_| ConfigError::InvalidStartTime(input.to_string()));
    }
    let body = input.strip_suffix('Z').unwrap_or(input);
    let parsed = START_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(body, format).ok())
        .ok_or_else(|| ConfigError::InvalidStartTime(input.to_string()))?;
    let micros = parsed.assume_utc().unix_timestamp_nanos() / 1_000;
    u64::try_from(micros).map_err(|_| ConfigError::InvalidStartTime(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    fn reference() -> TimeReference {
        TimeReference::new(1_500, datetime!(2026-10-19 08:05:03.25 UTC))
    }

    #[test]
    fn test_offsets() {
        assert_eq!(render_time(&reference(), TimeMode::OffsetMillis, UtcOffset::UTC), "1");
        assert_eq!(render_time(&reference(), TimeMode::OffsetMicros, UtcOffset::UTC), "1500");
    }

    #[test]
    fn test_iso8601_basic() {
        assert_eq!(
            render_time(&reference(), TimeMode::WallclockIso8601, offset!(+2)),
            "20261019T080503.250000Z"
        );
    }

    #[test]
    fn test_posix_utc_and_offset() {
        assert_eq!(
            render_time(&reference(), TimeMode::WallclockPosix, UtcOffset::UTC),
            "Mon Oct 19 08:05:03 2026 UTC"
        );
        assert_eq!(
            render_time(&reference(), TimeMode::WallclockPosix, offset!(+10:30)),
            "Mon Oct 19 18:35:03 2026 +10:30"
        );
    }

    #[test]
    fn test_posix_pads_day_with_space() {
        let r = TimeReference::new(0, datetime!(2026-03-05 00:00:00 UTC));
        assert_eq!(
            render_time(&r, TimeMode::WallclockPosix, UtcOffset::UTC),
            "Thu Mar  5 00:00:00 2026 UTC"
        );
    }

    #[test]
    fn test_parse_start_time() -> anyhow::Result<()> {
        assert_eq!(parse_start_time("1500")?, 1500);
        assert_eq!(parse_start_time("1970-01-01T00:00:01Z")?, 1_000_000);
        assert_eq!(parse_start_time("19700101T000002.5")?, 2_500_000);
        assert_eq!(parse_start_time("1970-01-01T00:00:00.000250")?, 250);
        assert!(parse_start_time("yesterday").is_err());
        assert!(parse_start_time("").is_err());
        Ok(())
    }
}
