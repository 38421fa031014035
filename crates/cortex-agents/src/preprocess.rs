//! Deterministic text preprocessing.
//!
//! Resolves date, time, priority and status cues (German and English) before
//! any model sees the text, so the structure agent receives hard values
//! instead of having to do calendar arithmetic.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DateRule {
    /// Fixed day offset from the reference date.
    Relative(i64),
    /// Next occurrence of a weekday (0 = Monday), strictly in the future.
    Weekday(i64),
    /// Next Friday, inclusive of today.
    EndOfWeek,
    /// Last day of the current month.
    EndOfMonth,
}

const DATE_PATTERNS: &[(&str, DateRule)] = &[
    (r"\bheute\b", DateRule::Relative(0)),
    (r"\btoday\b", DateRule::Relative(0)),
    (r"\bübermorgen\b", DateRule::Relative(2)),
    (r"\bmorgen\b", DateRule::Relative(1)),
    (r"\btomorrow\b", DateRule::Relative(1)),
    (r"\bnächste woche\b", DateRule::Relative(7)),
    (r"\bin einer woche\b", DateRule::Relative(7)),
    (r"\bnext week\b", DateRule::Relative(7)),
    (r"\bnächsten montag\b", DateRule::Weekday(0)),
    (r"\bnächsten dienstag\b", DateRule::Weekday(1)),
    (r"\bnächsten mittwoch\b", DateRule::Weekday(2)),
    (r"\bnächsten donnerstag\b", DateRule::Weekday(3)),
    (r"\bnächsten freitag\b", DateRule::Weekday(4)),
    (r"\bnächsten samstag\b", DateRule::Weekday(5)),
    (r"\bnächsten sonntag\b", DateRule::Weekday(6)),
    (r"\bende der woche\b", DateRule::EndOfWeek),
    (r"\bend of week\b", DateRule::EndOfWeek),
    (r"\bende des monats\b", DateRule::EndOfMonth),
    (r"\bend of month\b", DateRule::EndOfMonth),
    (r"\bmontag\b", DateRule::Weekday(0)),
    (r"\bmonday\b", DateRule::Weekday(0)),
    (r"\bdienstag\b", DateRule::Weekday(1)),
    (r"\btuesday\b", DateRule::Weekday(1)),
    (r"\bmittwoch\b", DateRule::Weekday(2)),
    (r"\bwednesday\b", DateRule::Weekday(2)),
    (r"\bdonnerstag\b", DateRule::Weekday(3)),
    (r"\bthursday\b", DateRule::Weekday(3)),
    (r"\bfreitag\b", DateRule::Weekday(4)),
    (r"\bfriday\b", DateRule::Weekday(4)),
    (r"\bsamstag\b", DateRule::Weekday(5)),
    (r"\bsaturday\b", DateRule::Weekday(5)),
    (r"\bsonntag\b", DateRule::Weekday(6)),
    (r"\bsunday\b", DateRule::Weekday(6)),
];

const NAMED_TIMES: &[(&str, &str)] = &[
    (r"\bnachmittags?\b", "15:00"),
    (r"\bvormittags?\b", "10:00"),
    (r"\bmorgens\b", "08:00"),
    (r"\bmorning\b", "08:00"),
    (r"\bmittags?\b", "12:00"),
    (r"\bnoon\b", "12:00"),
    (r"\bafternoon\b", "15:00"),
    (r"\babends?\b", "18:00"),
    (r"\bevening\b", "18:00"),
    (r"\bnachts?\b", "22:00"),
    (r"\bnight\b", "22:00"),
    (r"\bfrüh\b", "07:00"),
    (r"\bfrueh\b", "07:00"),
    (r"\bearly\b", "07:00"),
    (r"\bspät\b", "20:00"),
    (r"\bspaet\b", "20:00"),
    (r"\blate\b", "20:00"),
];

const PRIORITY_HIGH: &[&str] = &[
    "dringend", "asap", "sofort", "wichtig", "urgent", "kritisch", "eilig",
];
const PRIORITY_LOW: &[&str] = &[
    "irgendwann", "wenn zeit", "niedrig", "low", "unwichtig", "someday",
];

#[derive(Debug, Clone)]
pub struct DateMatch {
    pub date: NaiveDate,
    pub original: String,
}

#[derive(Debug, Clone)]
pub struct TimeMatch {
    /// HH:MM
    pub time: String,
    pub original: String,
}

#[derive(Debug, Clone)]
pub struct PreprocessResult {
    pub resolved_date: Option<NaiveDate>,
    pub resolved_time: Option<String>,
    pub priority: i64,
    pub status: Option<String>,
    /// Human-readable trail of what matched, for prompt context and review.
    pub hints: serde_json::Map<String, Value>,
}

pub struct Preprocessor {
    reference: NaiveDateTime,
}

impl Preprocessor {
    pub fn new(reference: NaiveDateTime) -> Self {
        Self { reference }
    }

    /// Reference "now" in the configured local timezone.
    pub fn for_timezone(tz: Tz) -> Self {
        Self::new(Utc::now().with_timezone(&tz).naive_local())
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference.date()
    }

    pub fn resolve_date(&self, text: &str) -> Option<DateMatch> {
        let lower = text.to_lowercase();
        let today = self.reference.date();

        for (pattern, rule) in DATE_PATTERNS {
            let re = cached_regex(pattern);
            let Some(m) = re.find(&lower) else {
                continue;
            };
            let date = match rule {
                DateRule::Relative(days) => today + Duration::days(*days),
                DateRule::Weekday(target) => {
                    let mut ahead = target - today.weekday().num_days_from_monday() as i64;
                    if ahead <= 0 {
                        ahead += 7;
                    }
                    today + Duration::days(ahead)
                }
                DateRule::EndOfWeek => {
                    let mut ahead = 4 - today.weekday().num_days_from_monday() as i64;
                    if ahead < 0 {
                        ahead += 7;
                    }
                    today + Duration::days(ahead)
                }
                DateRule::EndOfMonth => last_day_of_month(today),
            };
            return Some(DateMatch {
                date,
                original: m.as_str().to_string(),
            });
        }

        static IN_DAYS_RE: OnceLock<Regex> = OnceLock::new();
        let in_days = IN_DAYS_RE
            .get_or_init(|| Regex::new(r"\bin (\d+) (tagen?|days?|wochen?|weeks?)\b").unwrap());
        if let Some(caps) = in_days.captures(&lower) {
            let n: i64 = caps[1].parse().ok()?;
            let unit = &caps[2];
            let days = if unit.starts_with("woche") || unit.starts_with("week") {
                n * 7
            } else {
                n
            };
            return Some(DateMatch {
                date: today + Duration::days(days),
                original: caps[0].to_string(),
            });
        }

        static DMY_RE: OnceLock<Regex> = OnceLock::new();
        let dmy = DMY_RE.get_or_init(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").unwrap());
        if let Some(caps) = dmy.captures(text) {
            if let Some(date) = NaiveDate::from_ymd_opt(
                caps[3].parse().ok()?,
                caps[2].parse().ok()?,
                caps[1].parse().ok()?,
            ) {
                return Some(DateMatch {
                    date,
                    original: caps[0].to_string(),
                });
            }
        }

        static YMD_RE: OnceLock<Regex> = OnceLock::new();
        let ymd = YMD_RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());
        if let Some(caps) = ymd.captures(text) {
            if let Some(date) = NaiveDate::from_ymd_opt(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            ) {
                return Some(DateMatch {
                    date,
                    original: caps[0].to_string(),
                });
            }
        }

        None
    }

    pub fn resolve_time(&self, text: &str) -> Option<TimeMatch> {
        let lower = text.to_lowercase();

        // Explicit clock times take precedence over named tokens.
        static HHMM_RE: OnceLock<Regex> = OnceLock::new();
        let hhmm = HHMM_RE.get_or_init(|| Regex::new(r"\b(\d{1,2}):(\d{2})(?:\s*uhr)?\b").unwrap());
        if let Some(caps) = hhmm.captures(&lower) {
            let h: u32 = caps[1].parse().ok()?;
            let m: u32 = caps[2].parse().ok()?;
            if h <= 23 && m <= 59 {
                return Some(TimeMatch {
                    time: format!("{h:02}:{m:02}"),
                    original: caps[0].to_string(),
                });
            }
        }

        static HH_UHR_RE: OnceLock<Regex> = OnceLock::new();
        let hh_uhr = HH_UHR_RE.get_or_init(|| Regex::new(r"\b(\d{1,2})\s*uhr\b").unwrap());
        if let Some(caps) = hh_uhr.captures(&lower) {
            let h: u32 = caps[1].parse().ok()?;
            if h <= 23 {
                return Some(TimeMatch {
                    time: format!("{h:02}:00"),
                    original: caps[0].to_string(),
                });
            }
        }

        for (pattern, time) in NAMED_TIMES {
            let re = cached_regex(pattern);
            if let Some(m) = re.find(&lower) {
                return Some(TimeMatch {
                    time: (*time).to_string(),
                    original: m.as_str().to_string(),
                });
            }
        }

        None
    }

    pub fn resolve_priority(&self, text: &str) -> i64 {
        let lower = text.to_lowercase();
        if PRIORITY_HIGH.iter().any(|k| lower.contains(k)) {
            return 1;
        }
        if PRIORITY_LOW.iter().any(|k| lower.contains(k)) {
            return 3;
        }
        2
    }

    /// Category-scoped status. Returns None for categories without a status
    /// column (people, calendar_events).
    pub fn resolve_status(&self, text: &str, category: &str) -> Option<String> {
        let lower = text.to_lowercase();
        let table: &[(&str, &[&str])] = match category {
            "tasks" => &[
                ("next", &["als nächstes", "jetzt", "sofort anfangen", "next"]),
                ("waiting", &["warte auf", "wartend", "blocked", "blockiert"]),
                ("someday", &["irgendwann", "someday", "vielleicht", "maybe"]),
                ("done", &["erledigt", "done", "fertig", "abgeschlossen"]),
            ],
            "ideas" => &[("done", &["umgesetzt", "erledigt", "done"])],
            "projects" => &[
                ("on_hold", &["pausiert", "on hold", "pause"]),
                ("completed", &["abgeschlossen", "fertig", "completed"]),
                ("cancelled", &["abgebrochen", "cancelled", "storniert"]),
            ],
            _ => return None,
        };

        for (status, keywords) in table {
            if keywords.iter().any(|k| lower.contains(k)) {
                return Some((*status).to_string());
            }
        }

        Some(default_status(category).to_string())
    }

    pub fn preprocess(&self, text: &str, category: &str) -> PreprocessResult {
        let mut hints = serde_json::Map::new();

        let date = self.resolve_date(text);
        if let Some(ref d) = date {
            hints.insert("date".into(), json!(format!("{} -> {}", d.original, d.date)));
        }

        let time = self.resolve_time(text);
        if let Some(ref t) = time {
            hints.insert("time".into(), json!(format!("{} -> {}", t.original, t.time)));
        }

        let priority = self.resolve_priority(text);
        if priority != 2 {
            hints.insert("priority".into(), json!(priority));
        }

        let status = self.resolve_status(text, category);
        if let Some(ref s) = status {
            if s != "inbox" && s != "active" {
                hints.insert("status".into(), json!(s));
            }
        }

        PreprocessResult {
            resolved_date: date.map(|d| d.date),
            resolved_time: time.map(|t| t.time),
            priority,
            status,
            hints,
        }
    }

    /// Context map handed to the structure agent's prompt template.
    pub fn prompt_context(&self, text: &str, category: &str) -> serde_json::Map<String, Value> {
        let result = self.preprocess(text, category);

        // Calendar entries get a combined start instant, noon when no time
        // cue was found.
        let resolved_start_time = if category == "calendar_events" {
            result.resolved_date.map(|date| {
                let time = result.resolved_time.as_deref().unwrap_or("12:00");
                format!("{date}T{time}:00")
            })
        } else {
            None
        };

        let mut ctx = serde_json::Map::new();
        ctx.insert("text".into(), json!(text));
        ctx.insert(
            "current_date".into(),
            json!(self.reference.date().to_string()),
        );
        ctx.insert(
            "resolved_due_date".into(),
            result
                .resolved_date
                .map(|d| json!(d.to_string()))
                .unwrap_or(Value::Null),
        );
        ctx.insert(
            "resolved_time".into(),
            result.resolved_time.map(Value::from).unwrap_or(Value::Null),
        );
        ctx.insert(
            "resolved_start_time".into(),
            resolved_start_time.map(Value::from).unwrap_or(Value::Null),
        );
        ctx.insert("resolved_priority".into(), json!(result.priority));
        ctx.insert(
            "resolved_status".into(),
            result.status.map(Value::from).unwrap_or(Value::Null),
        );
        ctx.insert("preprocessing_hints".into(), Value::Object(result.hints));
        ctx
    }
}

pub fn default_status(category: &str) -> &'static str {
    match category {
        "projects" => "active",
        _ => "inbox",
    }
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month") - Duration::days(1)
}

fn cached_regex(pattern: &'static str) -> Regex {
    use std::collections::HashMap;
    use std::sync::Mutex;
    static CACHE: OnceLock<Mutex<HashMap<&'static str, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap();
    cache
        .entry(pattern)
        .or_insert_with(|| Regex::new(pattern).unwrap())
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre(reference: &str) -> Preprocessor {
        let dt = NaiveDateTime::parse_from_str(reference, "%Y-%m-%d %H:%M").unwrap();
        Preprocessor::new(dt)
    }

    #[test]
    fn relative_dates_resolve() {
        // Monday 2026-01-12.
        let p = pre("2026-01-12 09:00");
        assert_eq!(
            p.resolve_date("das mache ich heute").unwrap().date.to_string(),
            "2026-01-12"
        );
        assert_eq!(
            p.resolve_date("morgen anrufen").unwrap().date.to_string(),
            "2026-01-13"
        );
        assert_eq!(
            p.resolve_date("übermorgen fällig").unwrap().date.to_string(),
            "2026-01-14"
        );
    }

    #[test]
    fn weekday_is_strictly_in_the_future() {
        // Monday: "montag" must jump a full week, "freitag" stays in-week.
        let p = pre("2026-01-12 09:00");
        assert_eq!(
            p.resolve_date("am montag").unwrap().date.to_string(),
            "2026-01-19"
        );
        assert_eq!(
            p.resolve_date("bis freitag").unwrap().date.to_string(),
            "2026-01-16"
        );
        assert_eq!(
            p.resolve_date("nächsten freitag").unwrap().date.to_string(),
            "2026-01-16"
        );
    }

    #[test]
    fn end_of_week_is_friday_inclusive() {
        // Friday stays today; Saturday rolls to next Friday.
        let friday = pre("2026-01-16 08:00");
        assert_eq!(
            friday.resolve_date("ende der woche").unwrap().date.to_string(),
            "2026-01-16"
        );
        let saturday = pre("2026-01-17 08:00");
        assert_eq!(
            saturday.resolve_date("ende der woche").unwrap().date.to_string(),
            "2026-01-23"
        );
    }

    #[test]
    fn end_of_month_is_last_day() {
        let p = pre("2026-02-10 08:00");
        assert_eq!(
            p.resolve_date("ende des monats").unwrap().date.to_string(),
            "2026-02-28"
        );
    }

    #[test]
    fn offset_days_and_weeks() {
        let p = pre("2026-01-12 09:00");
        assert_eq!(
            p.resolve_date("in 3 tagen").unwrap().date.to_string(),
            "2026-01-15"
        );
        assert_eq!(
            p.resolve_date("in 2 wochen").unwrap().date.to_string(),
            "2026-01-26"
        );
    }

    #[test]
    fn explicit_dates_parse_both_formats() {
        let p = pre("2026-01-12 09:00");
        assert_eq!(
            p.resolve_date("am 24.12.2026 feiern").unwrap().date.to_string(),
            "2026-12-24"
        );
        assert_eq!(
            p.resolve_date("deadline 2026-03-01").unwrap().date.to_string(),
            "2026-03-01"
        );
        assert!(p.resolve_date("am 32.01.2026").is_none());
    }

    #[test]
    fn explicit_times_beat_named_tokens() {
        let p = pre("2026-01-12 09:00");
        assert_eq!(p.resolve_time("abends um 19:30").unwrap().time, "19:30");
        assert_eq!(p.resolve_time("um 9 uhr").unwrap().time, "09:00");
        assert_eq!(p.resolve_time("treffen abends").unwrap().time, "18:00");
        assert_eq!(p.resolve_time("nachmittags kurz").unwrap().time, "15:00");
        assert!(p.resolve_time("irgendwann mal").is_none());
    }

    #[test]
    fn out_of_range_times_are_rejected() {
        let p = pre("2026-01-12 09:00");
        assert!(p.resolve_time("um 25:00").is_none());
    }

    #[test]
    fn priority_mapping_is_total() {
        let p = pre("2026-01-12 09:00");
        assert_eq!(p.resolve_priority("das ist dringend!"), 1);
        assert_eq!(p.resolve_priority("irgendwann mal"), 3);
        assert_eq!(p.resolve_priority("Einkaufszettel"), 2);
    }

    #[test]
    fn status_defaults_per_category() {
        let p = pre("2026-01-12 09:00");
        assert_eq!(p.resolve_status("neue Aufgabe", "tasks").as_deref(), Some("inbox"));
        assert_eq!(
            p.resolve_status("warte auf Antwort", "tasks").as_deref(),
            Some("waiting")
        );
        assert_eq!(p.resolve_status("neues Projekt", "projects").as_deref(), Some("active"));
        assert_eq!(
            p.resolve_status("Projekt pausiert", "projects").as_deref(),
            Some("on_hold")
        );
        assert_eq!(p.resolve_status("Max kennengelernt", "people"), None);
    }

    #[test]
    fn calendar_events_get_noon_default_start() {
        let p = pre("2026-01-12 09:00");
        let ctx = p.prompt_context("Zahnarzt morgen", "calendar_events");
        assert_eq!(ctx["resolved_start_time"], json!("2026-01-13T12:00:00"));

        let ctx = p.prompt_context("Zahnarzt morgen um 14:30", "calendar_events");
        assert_eq!(ctx["resolved_start_time"], json!("2026-01-13T14:30:00"));
    }

    #[test]
    fn seed_scenario_invoice_until_friday() {
        // Monday 2026-01-12: "bis Freitag" resolves to the upcoming Friday.
        let p = pre("2026-01-12 10:00");
        let ctx = p.prompt_context("Rechnung an Schmidt schicken bis Freitag", "tasks");
        assert_eq!(ctx["resolved_due_date"], json!("2026-01-16"));
    }
}
