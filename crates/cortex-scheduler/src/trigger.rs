//! Trigger semantics for DB-configured schedules.
//!
//! `next_run` works on naive local wall time; the engine converts to UTC at
//! the storage boundary. Daily/weekly/monthly results are strictly after
//! the reference instant; interval results are exactly `reference + n`.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use cortex_store::{Row, RowExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Every `minutes` from the last completion.
    Interval { minutes: u32 },
    /// Every day at `time`.
    Daily { time: NaiveTime },
    /// Every week on `weekday` (0 = Monday … 6 = Sunday) at `time`.
    Weekly { weekday: u8, time: NaiveTime },
    /// Every month on `day` at `time`. Months without that day are skipped;
    /// the trigger rolls forward to the next month that has it.
    Monthly { day: u8, time: NaiveTime },
}

impl Trigger {
    /// Build from a joined schedules row. Returns None when the row is
    /// incomplete for its type.
    pub fn from_schedule_row(row: &Row) -> Option<Trigger> {
        let schedule_type = row.str_opt("type")?;
        match schedule_type {
            "interval" => {
                let minutes = row.i64_opt("interval_minutes")?;
                (minutes > 0).then(|| Trigger::Interval {
                    minutes: minutes as u32,
                })
            }
            "daily" => Some(Trigger::Daily {
                time: parse_time(row.str_opt("time_of_day")?)?,
            }),
            "weekly" => Some(Trigger::Weekly {
                weekday: row.i64_opt("day_of_week").unwrap_or(0).clamp(0, 6) as u8,
                time: parse_time(row.str_opt("time_of_day")?)?,
            }),
            "monthly" => Some(Trigger::Monthly {
                day: row.i64_opt("day_of_month").unwrap_or(1).clamp(1, 31) as u8,
                time: parse_time(row.str_opt("time_of_day")?)?,
            }),
            _ => None,
        }
    }

    /// Next execution instant after `reference`.
    pub fn next_run(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Trigger::Interval { minutes } => {
                Some(reference + Duration::minutes(minutes as i64))
            }

            Trigger::Daily { time } => {
                let candidate = reference.date().and_time(time);
                if candidate > reference {
                    Some(candidate)
                } else {
                    Some(candidate + Duration::days(1))
                }
            }

            Trigger::Weekly { weekday, time } => {
                let today = reference.date().weekday().num_days_from_monday() as i64;
                let mut ahead = weekday as i64 - today;
                if ahead < 0 {
                    ahead += 7;
                }
                let mut candidate = (reference.date() + Duration::days(ahead)).and_time(time);
                if candidate <= reference {
                    candidate += Duration::days(7);
                }
                Some(candidate)
            }

            Trigger::Monthly { day, time } => {
                let mut year = reference.year();
                let mut month = reference.month();
                // Bounded: even day 31 recurs within a few months.
                for _ in 0..48 {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, day as u32) {
                        let candidate = date.and_time(time);
                        if candidate > reference {
                            return Some(candidate);
                        }
                    }
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                }
                None
            }
        }
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn interval_is_exactly_reference_plus_minutes() {
        let t = Trigger::Interval { minutes: 30 };
        assert_eq!(t.next_run(at("2026-01-12 06:00")), Some(at("2026-01-12 06:30")));
    }

    #[test]
    fn daily_before_the_time_fires_today() {
        let t = Trigger::Daily { time: time("07:00") };
        assert_eq!(t.next_run(at("2026-01-12 06:00")), Some(at("2026-01-12 07:00")));
    }

    #[test]
    fn daily_after_the_time_fires_tomorrow() {
        let t = Trigger::Daily { time: time("07:00") };
        assert_eq!(t.next_run(at("2026-01-12 08:00")), Some(at("2026-01-13 07:00")));
    }

    #[test]
    fn daily_at_the_exact_time_fires_tomorrow() {
        let t = Trigger::Daily { time: time("07:00") };
        assert_eq!(t.next_run(at("2026-01-12 07:00")), Some(at("2026-01-13 07:00")));
    }

    #[test]
    fn weekly_rolls_to_next_monday() {
        // Tuesday 2026-01-13 → next Monday 2026-01-19.
        let t = Trigger::Weekly {
            weekday: 0,
            time: time("08:00"),
        };
        assert_eq!(t.next_run(at("2026-01-13 10:00")), Some(at("2026-01-19 08:00")));
    }

    #[test]
    fn weekly_same_day_before_time_fires_today() {
        // Monday morning, trigger Monday 08:00.
        let t = Trigger::Weekly {
            weekday: 0,
            time: time("08:00"),
        };
        assert_eq!(t.next_run(at("2026-01-12 07:00")), Some(at("2026-01-12 08:00")));
    }

    #[test]
    fn weekly_same_day_after_time_adds_seven_days() {
        let t = Trigger::Weekly {
            weekday: 0,
            time: time("08:00"),
        };
        assert_eq!(t.next_run(at("2026-01-12 09:00")), Some(at("2026-01-19 08:00")));
    }

    #[test]
    fn monthly_rolls_forward_to_the_first() {
        let t = Trigger::Monthly {
            day: 1,
            time: time("09:00"),
        };
        assert_eq!(t.next_run(at("2026-01-15 12:00")), Some(at("2026-02-01 09:00")));
    }

    #[test]
    fn monthly_day_31_skips_short_months() {
        let t = Trigger::Monthly {
            day: 31,
            time: time("09:00"),
        };
        // From Feb 1st: February and April have no 31st.
        assert_eq!(t.next_run(at("2026-02-01 00:00")), Some(at("2026-03-31 09:00")));
        assert_eq!(t.next_run(at("2026-03-31 10:00")), Some(at("2026-05-31 09:00")));
    }

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let reference = at("2026-01-12 07:00");
        for trigger in [
            Trigger::Daily { time: time("07:00") },
            Trigger::Weekly { weekday: 0, time: time("07:00") },
            Trigger::Monthly { day: 12, time: time("07:00") },
        ] {
            let next = trigger.next_run(reference).unwrap();
            assert!(next > reference, "{trigger:?} produced {next}");
        }
    }

    #[test]
    fn schedule_rows_parse_into_triggers() {
        let mut row = Row::new();
        row.insert("type".into(), "weekly".into());
        row.insert("time_of_day".into(), "08:00".into());
        row.insert("day_of_week".into(), 0.into());
        assert_eq!(
            Trigger::from_schedule_row(&row),
            Some(Trigger::Weekly {
                weekday: 0,
                time: time("08:00")
            })
        );

        let mut row = Row::new();
        row.insert("type".into(), "interval".into());
        row.insert("interval_minutes".into(), 0.into());
        assert_eq!(Trigger::from_schedule_row(&row), None);
    }
}
