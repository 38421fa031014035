//! iCalendar codec for the CalDAV adapter.
//!
//! Extracts every VEVENT in a VCALENDAR; `VALUE=DATE` start/end means an
//! all-day event. Serialisation is symmetric.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub all_day: bool,
    /// Raw RRULE string, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub recurrence: Option<String>,
    pub uid: Option<String>,
    pub etag: Option<String>,
}

pub fn parse(ics: &str) -> Vec<CalendarEvent> {
    static VEVENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = VEVENT_RE.get_or_init(|| Regex::new(r"(?s)BEGIN:VEVENT(.*?)END:VEVENT").unwrap());

    re.captures_iter(ics)
        .filter_map(|caps| parse_vevent(&caps[1]))
        .collect()
}

fn parse_vevent(block: &str) -> Option<CalendarEvent> {
    let mut event = CalendarEvent::default();

    for raw_line in block.lines() {
        let line = raw_line.trim();

        if let Some(value) = line.strip_prefix("UID:") {
            event.uid = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("SUMMARY:") {
            event.title = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("DESCRIPTION:") {
            event.description = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("LOCATION:") {
            event.location = Some(value.trim().to_string());
        } else if line.starts_with("DTSTART") {
            let (dt, all_day) = parse_datetime(line);
            event.start_time = dt;
            event.all_day = all_day;
        } else if line.starts_with("DTEND") {
            let (dt, _) = parse_datetime(line);
            event.end_time = dt;
        } else if let Some(value) = line.strip_prefix("RRULE:") {
            event.recurrence = Some(value.trim().to_string());
        }
    }

    if event.title.is_empty() && event.uid.is_none() {
        return None;
    }
    Some(event)
}

fn parse_datetime(line: &str) -> (Option<NaiveDateTime>, bool) {
    let Some(value) = line.rsplit(':').next() else {
        return (None, false);
    };
    let value = value.trim();

    if line.contains("VALUE=DATE") {
        let parsed = chrono::NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        return (parsed, true);
    }

    let value = value.trim_end_matches('Z');
    let parsed = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok();
    (parsed, false)
}

pub fn serialize(event: &CalendarEvent) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Cortex//CalDAV//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
    ];

    if let Some(ref uid) = event.uid {
        lines.push(format!("UID:{uid}"));
    }
    if !event.title.is_empty() {
        lines.push(format!("SUMMARY:{}", event.title));
    }
    if let Some(ref description) = event.description {
        lines.push(format!("DESCRIPTION:{description}"));
    }
    if let Some(ref location) = event.location {
        lines.push(format!("LOCATION:{location}"));
    }

    if let Some(start) = event.start_time {
        if event.all_day {
            lines.push(format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")));
        } else {
            lines.push(format!("DTSTART:{}", start.format("%Y%m%dT%H%M%SZ")));
        }
    }
    if let Some(end) = event.end_time {
        if event.all_day {
            lines.push(format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")));
        } else {
            lines.push(format!("DTEND:{}", end.format("%Y%m%dT%H%M%SZ")));
        }
    }

    if let Some(ref rrule) = event.recurrence {
        lines.push(format!("RRULE:{rrule}"));
    }

    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ICS: &str = "BEGIN:VCALENDAR\nVERSION:2.0\nBEGIN:VEVENT\nUID:evt-1\nSUMMARY:Zahnarzt\nDESCRIPTION:Kontrolle\nLOCATION:Berlin\nDTSTART:20260115T143000Z\nDTEND:20260115T150000Z\nRRULE:FREQ=YEARLY\nEND:VEVENT\nEND:VCALENDAR";

    #[test]
    fn parses_a_timed_event() {
        let events = parse(ICS);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.uid.as_deref(), Some("evt-1"));
        assert_eq!(event.title, "Zahnarzt");
        assert_eq!(event.description.as_deref(), Some("Kontrolle"));
        assert_eq!(event.location.as_deref(), Some("Berlin"));
        assert!(!event.all_day);
        assert_eq!(
            event.start_time.unwrap().format("%Y-%m-%d %H:%M").to_string(),
            "2026-01-15 14:30"
        );
        assert_eq!(event.recurrence.as_deref(), Some("FREQ=YEARLY"));
    }

    #[test]
    fn all_day_events_use_value_date() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:evt-2\nSUMMARY:Geburtstag\nDTSTART;VALUE=DATE:20260520\nDTEND;VALUE=DATE:20260521\nEND:VEVENT\nEND:VCALENDAR";
        let events = parse(ics);
        assert_eq!(events.len(), 1);
        assert!(events[0].all_day);
        assert_eq!(
            events[0].start_time.unwrap().format("%Y-%m-%d").to_string(),
            "2026-05-20"
        );
    }

    #[test]
    fn multiple_vevents_are_all_extracted() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:a\nSUMMARY:Eins\nEND:VEVENT\nBEGIN:VEVENT\nUID:b\nSUMMARY:Zwei\nEND:VEVENT\nEND:VCALENDAR";
        let events = parse(ics);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].title, "Zwei");
    }

    #[test]
    fn empty_blocks_are_skipped() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nEND:VEVENT\nEND:VCALENDAR";
        assert!(parse(ics).is_empty());
    }

    #[test]
    fn round_trip_preserves_the_contract_fields() {
        let original = parse(ICS).remove(0);
        let reparsed = parse(&serialize(&original)).remove(0);
        assert_eq!(reparsed, original);
    }

    #[test]
    fn all_day_round_trip() {
        let event = CalendarEvent {
            title: "Urlaub".into(),
            uid: Some("evt-3".into()),
            all_day: true,
            start_time: chrono::NaiveDate::from_ymd_opt(2026, 7, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0),
            end_time: chrono::NaiveDate::from_ymd_opt(2026, 7, 14)
                .unwrap()
                .and_hms_opt(0, 0, 0),
            ..Default::default()
        };
        let reparsed = parse(&serialize(&event)).remove(0);
        assert_eq!(reparsed, event);
    }
}
