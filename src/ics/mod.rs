//! Tolerant import of iCalendar (`.ics`) text into [`CalendarEvent`]s.
//!
//! Only `VEVENT` blocks are read, and of those only `SUMMARY`, `UID`,
//! `DTSTART` and `DTEND`. Malformed lines and events are skipped rather than
//! reported; the parser never fails as a whole.

use indexmap::IndexMap;
use serde_json::Map;

use crate::storage::CalendarEvent;

mod datetime;

pub use datetime::{parse_datetime, ParsedDateTime, DATE_ONLY_MARKER};

pub const BEGIN_EVENT: &str = "BEGIN:VEVENT";
pub const END_EVENT: &str = "END:VEVENT";
pub const DEFAULT_TITLE: &str = "Untitled Event";
pub const MAX_TITLE_CHARS: usize = 200;
const SYNTHETIC_UID_PREFIX: &str = "imported-";

/// One `NAME;PARAMS:VALUE` line inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Everything before the first colon, name included.
    pub params: String,
    pub value: String,
}

/// Properties of one block keyed by upper-cased name; later lines win.
pub type PropertyMap = IndexMap<String, Property>;

/// Parses a whole calendar file.
pub fn parse_calendar(content: &str) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut current: Option<PropertyMap> = None;
    let mut dropped = 0usize;

    for line in unfold_lines(content) {
        if line.is_empty() {
            continue;
        }
        if line == BEGIN_EVENT {
            if current.is_some() {
                tracing::debug!("discarding unterminated event block");
            }
            current = Some(PropertyMap::new());
        } else if line == END_EVENT {
            // An END without a matching BEGIN is ignored.
            if let Some(properties) = current.take() {
                match normalize_event(&properties) {
                    Some(event) => events.push(event),
                    None => dropped += 1,
                }
            }
        } else if let Some(properties) = current.as_mut() {
            if let Some((key, property)) = parse_property(&line) {
                properties.insert(key, property);
            }
        }
    }

    if current.is_some() {
        tracing::debug!("discarding unterminated event block at end of input");
    }
    if dropped > 0 {
        tracing::warn!(dropped, "skipped calendar events without a usable start");
    }
    events
}

/// Joins folded lines back into logical lines.
///
/// Line endings are normalized first. A physical line starting with a space
/// or tab continues the previous logical line, minus that one character;
/// every other line is trimmed.
pub fn unfold_lines(content: &str) -> Vec<String> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut unfolded: Vec<String> = Vec::new();
    for line in normalized.split('\n') {
        if line.starts_with(|ch: char| ch == ' ' || ch == '\t') {
            if let Some(previous) = unfolded.last_mut() {
                previous.push_str(&line[1..]);
                continue;
            }
        }
        unfolded.push(line.trim().to_string());
    }
    unfolded
}

/// Splits a content line at its first colon. Lines without a colon, or with
/// nothing before it, yield `None`.
pub fn parse_property(line: &str) -> Option<(String, Property)> {
    let colon = line.find(':').filter(|&idx| idx > 0)?;
    let (params, rest) = line.split_at(colon);
    let name = params.split(';').next().unwrap_or_default();
    Some((
        name.to_uppercase(),
        Property {
            params: params.to_string(),
            value: rest[1..].to_string(),
        },
    ))
}

/// Turns a finished block into an event, or `None` when it has no usable
/// start.
pub fn normalize_event(properties: &PropertyMap) -> Option<CalendarEvent> {
    let start_prop = properties.get("DTSTART")?;
    let start = parse_datetime(&start_prop.value, &start_prop.params)?;
    let end = properties
        .get("DTEND")
        .and_then(|prop| parse_datetime(&prop.value, &prop.params));

    let title = properties
        .get("SUMMARY")
        .map(|prop| prop.value.as_str())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    let id = properties
        .get("UID")
        .map(|prop| prop.value.clone())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(synthesize_uid);

    Some(CalendarEvent {
        id,
        title,
        start: start.datetime,
        end: end.map(|parsed| parsed.datetime),
        all_day: start.all_day,
        recurrence: None,
        extra: Map::new(),
    })
}

fn synthesize_uid() -> String {
    format!("{SYNTHETIC_UID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn block(lines: &[&str]) -> String {
        let mut out = vec!["BEGIN:VCALENDAR", "VERSION:2.0", BEGIN_EVENT];
        out.extend_from_slice(lines);
        out.extend_from_slice(&[END_EVENT, "END:VCALENDAR"]);
        out.join("\r\n")
    }

    #[test]
    fn all_day_event_round_trips() {
        let events = parse_calendar(&block(&["DTSTART:20240101", "SUMMARY:Test"]));
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.title, "Test");
        assert_eq!(event.start, "2024-01-01");
        assert!(event.all_day);
        assert_eq!(event.end, None);
    }

    #[test]
    fn timed_event_with_end_and_uid() {
        let events = parse_calendar(&block(&[
            "UID:abc-123@example.com",
            "SUMMARY:Review",
            "DTSTART;TZID=Europe/Paris:20240615T143000",
            "DTEND:20240615T153000Z",
        ]));
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id, "abc-123@example.com");
        assert_eq!(event.start, "2024-06-15T14:30:00");
        assert_eq!(event.end.as_deref(), Some("2024-06-15T15:30:00Z"));
        assert!(!event.all_day);
    }

    #[test]
    fn folded_lines_are_rejoined() {
        let unfolded = unfold_lines("SUMMARY:Hello\r\n  World\r\nUID:1");
        assert_eq!(unfolded, vec!["SUMMARY:Hello World", "UID:1"]);

        // The single folding space itself is not part of the value.
        let unfolded = unfold_lines("DESCRIPTION:abc\n\tdef\n ghi");
        assert_eq!(unfolded, vec!["DESCRIPTION:abcdefghi"]);
    }

    #[test]
    fn folded_summary_reaches_the_event_title() {
        let events = parse_calendar(&block(&["SUMMARY:Hello", "  World", "DTSTART:20240101"]));
        assert_eq!(events[0].title, "Hello World");
    }

    #[test]
    fn bare_carriage_returns_split_lines() {
        let unfolded = unfold_lines("A:1\rB:2\r\n C");
        assert_eq!(unfolded, vec!["A:1", "B:2C"]);
    }

    #[test]
    fn event_without_start_is_dropped() {
        assert!(parse_calendar(&block(&["SUMMARY:No start"])).is_empty());
        assert!(parse_calendar(&block(&["SUMMARY:Bad start", "DTSTART:tomorrow"])).is_empty());
    }

    #[test]
    fn unparseable_end_is_swallowed() {
        let events = parse_calendar(&block(&["DTSTART:20240101", "DTEND:soon"]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].end, None);
    }

    #[test]
    fn missing_or_empty_summary_gets_default_title() {
        let events = parse_calendar(&block(&["DTSTART:20240101", "SUMMARY:"]));
        assert_eq!(events[0].title, DEFAULT_TITLE);
        let events = parse_calendar(&block(&["DTSTART:20240101"]));
        assert_eq!(events[0].title, DEFAULT_TITLE);
    }

    #[test]
    fn long_titles_are_truncated() {
        let summary = format!("SUMMARY:{}", "ü".repeat(250));
        let events = parse_calendar(&block(&[summary.as_str(), "DTSTART:20240101"]));
        assert_eq!(events[0].title.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn synthesized_ids_are_unique_within_a_run() {
        let one = [BEGIN_EVENT, "DTSTART:20240101", END_EVENT].join("\n");
        let content = std::iter::repeat(one).take(50).collect::<Vec<_>>().join("\n");
        let events = parse_calendar(&content);
        assert_eq!(events.len(), 50);
        let ids: HashSet<_> = events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids.len(), 50);
        assert!(events[0].id.starts_with(SYNTHETIC_UID_PREFIX));
    }

    #[test]
    fn last_property_occurrence_wins() {
        let events = parse_calendar(&block(&[
            "SUMMARY:First",
            "summary;LANGUAGE=en:Second",
            "DTSTART:20240101",
        ]));
        assert_eq!(events[0].title, "Second");
    }

    #[test]
    fn stray_and_unterminated_blocks_are_tolerated() {
        let content = [
            END_EVENT,
            "SUMMARY:outside any block",
            BEGIN_EVENT,
            "SUMMARY:abandoned",
            "DTSTART:20240101",
            BEGIN_EVENT,
            "SUMMARY:kept",
            "DTSTART:20240202",
            END_EVENT,
            BEGIN_EVENT,
            "SUMMARY:never closed",
            "DTSTART:20240303",
        ]
        .join("\n");
        let events = parse_calendar(&content);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "kept");
        assert_eq!(events[0].start, "2024-02-02");
    }

    #[test]
    fn property_lines_split_at_first_colon() {
        let (key, prop) = parse_property("dtstart;tzid=America/New_York:20240101T090000")
            .expect("property");
        assert_eq!(key, "DTSTART");
        assert_eq!(prop.params, "dtstart;tzid=America/New_York");
        assert_eq!(prop.value, "20240101T090000");

        let (_, prop) = parse_property("URL:https://example.com").expect("property");
        assert_eq!(prop.value, "https://example.com");

        assert_eq!(parse_property("no colon here"), None);
        assert_eq!(parse_property(":leading colon"), None);
    }

    #[test]
    fn garbage_input_yields_nothing() {
        assert!(parse_calendar("").is_empty());
        assert!(parse_calendar("\u{0}\u{1}not a calendar\n\n\t").is_empty());
    }
}
