use once_cell::sync::Lazy;
use regex::Regex;

/// Parameter marker that forces the date-only interpretation. Matched as a
/// substring of the raw parameter segment, so `VALUE=DATE-TIME` matches too.
pub const DATE_ONLY_MARKER: &str = "VALUE=DATE";

static DATE_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{8}$").expect("date pattern compiles"));
static DATE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{8}T[0-9]{6}Z?$").expect("date-time pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDateTime {
    /// `YYYY-MM-DD` for all-day values, `YYYY-MM-DDTHH:MM:SS[Z]` otherwise.
    pub datetime: String,
    pub all_day: bool,
}

/// Normalizes a `DTSTART`/`DTEND` value.
///
/// Only two shapes are recognised: `YYYYMMDD` and `YYYYMMDDTHHMMSS` with an
/// optional trailing `Z`. Digits are reformatted, never range-checked.
pub fn parse_datetime(value: &str, params: &str) -> Option<ParsedDateTime> {
    if value.is_empty() {
        return None;
    }

    let all_day = params.contains(DATE_ONLY_MARKER) || DATE_ONLY.is_match(value);
    if all_day {
        if !DATE_ONLY.is_match(value) {
            return None;
        }
        return Some(ParsedDateTime {
            datetime: format!("{}-{}-{}", &value[0..4], &value[4..6], &value[6..8]),
            all_day: true,
        });
    }

    if !DATE_TIME.is_match(value) {
        return None;
    }
    let utc = if value.ends_with('Z') { "Z" } else { "" };
    Some(ParsedDateTime {
        datetime: format!(
            "{}-{}-{}T{}:{}:{}{utc}",
            &value[0..4],
            &value[4..6],
            &value[6..8],
            &value[9..11],
            &value[11..13],
            &value[13..15],
        ),
        all_day: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(datetime: &str, all_day: bool) -> Option<ParsedDateTime> {
        Some(ParsedDateTime {
            datetime: datetime.to_string(),
            all_day,
        })
    }

    #[test]
    fn eight_digits_are_all_day() {
        assert_eq!(parse_datetime("20240101", "DTSTART"), parsed("2024-01-01", true));
        assert_eq!(
            parse_datetime("20240101", "DTSTART;VALUE=DATE"),
            parsed("2024-01-01", true)
        );
    }

    #[test]
    fn timestamps_keep_the_utc_suffix_only_when_present() {
        assert_eq!(
            parse_datetime("20240615T143000Z", "DTSTART"),
            parsed("2024-06-15T14:30:00Z", false)
        );
        assert_eq!(
            parse_datetime("20240615T143000", "DTSTART;TZID=Europe/Berlin"),
            parsed("2024-06-15T14:30:00", false)
        );
    }

    #[test]
    fn date_marker_with_timestamp_value_fails() {
        assert_eq!(parse_datetime("20240615T143000", "DTSTART;VALUE=DATE"), None);
        assert_eq!(
            parse_datetime("20240615T143000", "DTSTART;VALUE=DATE-TIME"),
            None
        );
    }

    #[test]
    fn other_shapes_are_rejected() {
        for value in [
            "",
            "2024-01-01",
            "202401011",
            "20240615T1430",
            "20240615T143000z",
            "20240615T143000+0200",
            "٢٠٢٤٠١٠١",
        ] {
            assert_eq!(parse_datetime(value, "DTSTART"), None, "value {value:?}");
        }
    }

    #[test]
    fn digits_are_not_range_checked() {
        assert_eq!(parse_datetime("20241399", "DTSTART"), parsed("2024-13-99", true));
    }
}
