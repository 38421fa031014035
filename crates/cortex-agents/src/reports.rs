//! Daily and weekly report agents.
//!
//! Each runs the canonical queries itself (`generate_from_db`) so the
//! scheduler handlers stay one-liners, then hands the rows to its
//! DB-configured prompt.

use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};

use cortex_store::{Row, Store};

use crate::agent::ConfigurableAgent;
use crate::error::Result;

fn rows_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Morning focus report: top tasks, the thing being avoided, a quick win.
pub struct DailyReportAgent {
    store: Store,
    agent: ConfigurableAgent,
}

impl DailyReportAgent {
    pub fn new(store: Store) -> Result<Self> {
        let agent = ConfigurableAgent::new(store.clone(), "daily_report_agent")?;
        Ok(Self { store, agent })
    }

    pub async fn generate(
        &self,
        today: NaiveDate,
        open_tasks: Value,
        overdue_tasks: Value,
        todays_events: Value,
        recently_completed: Value,
    ) -> Result<serde_json::Map<String, Value>> {
        let mut ctx = serde_json::Map::new();
        ctx.insert("today".into(), json!(today.to_string()));
        ctx.insert("open_tasks".into(), open_tasks);
        ctx.insert("overdue_tasks".into(), overdue_tasks);
        ctx.insert("todays_events".into(), todays_events);
        ctx.insert("recently_completed".into(), recently_completed);
        self.agent.execute(&ctx).await
    }

    /// Convenience entry used by the scheduler: gathers all inputs itself.
    pub async fn generate_from_db(&self, today: NaiveDate) -> Result<serde_json::Map<String, Value>> {
        let today_str = today.to_string();
        let yesterday = (today - Duration::days(1)).to_string();

        let open_tasks = self.store.query(
            "SELECT t.id, t.title, t.due_date, t.priority, p.name AS project_name
             FROM tasks t
             LEFT JOIN projects p ON t.project_id = p.id
             WHERE t.status IN ('inbox', 'next', 'waiting') AND t.deleted_at IS NULL
             ORDER BY t.priority ASC, t.due_date IS NULL, t.due_date ASC
             LIMIT 20",
            &[],
        )?;

        let overdue_tasks = self.store.query(
            "SELECT id, title, due_date,
                    CAST(julianday(?1) - julianday(due_date) AS INTEGER) AS days_overdue
             FROM tasks
             WHERE status NOT IN ('done', 'someday') AND deleted_at IS NULL
               AND due_date IS NOT NULL AND due_date < ?1
             ORDER BY due_date ASC
             LIMIT 10",
            &[&today_str],
        )?;

        let todays_events = self.store.query(
            "SELECT e.id, e.title, e.start_time, p.name AS person_name
             FROM calendar_events e
             LEFT JOIN people p ON e.person_id = p.id
             WHERE date(e.start_time) = ?1
             ORDER BY e.start_time ASC",
            &[&today_str],
        )?;

        let recently_completed = self.store.query(
            "SELECT id, title, updated_at AS completed_at
             FROM tasks
             WHERE status = 'done' AND deleted_at IS NULL AND date(updated_at) >= ?1
             ORDER BY updated_at DESC
             LIMIT 5",
            &[&yesterday],
        )?;

        self.generate(
            today,
            rows_json(open_tasks),
            rows_json(overdue_tasks),
            rows_json(todays_events),
            rows_json(recently_completed),
        )
        .await
    }
}

/// Weekly review: completions, biggest open projects, upcoming calendar,
/// and a pattern insight over the closed week.
pub struct WeeklyReportAgent {
    store: Store,
    agent: ConfigurableAgent,
}

impl WeeklyReportAgent {
    pub fn new(store: Store) -> Result<Self> {
        let agent = ConfigurableAgent::new(store.clone(), "weekly_report_agent")?;
        Ok(Self { store, agent })
    }

    pub async fn generate_from_db(&self, today: NaiveDate) -> Result<serde_json::Map<String, Value>> {
        let period_end = today.to_string();
        let period_start = (today - Duration::days(7)).to_string();
        let horizon = (today + Duration::days(7)).to_string();

        let completed_tasks = self.store.query(
            "SELECT t.id, t.title, t.updated_at AS completed_at, p.name AS project_name
             FROM tasks t
             LEFT JOIN projects p ON t.project_id = p.id
             WHERE t.status = 'done' AND t.deleted_at IS NULL AND date(t.updated_at) >= ?1
             ORDER BY t.updated_at DESC",
            &[&period_start],
        )?;

        let new_tasks = self.store.query(
            "SELECT id, title, created_at
             FROM tasks
             WHERE deleted_at IS NULL AND date(created_at) >= ?1
             ORDER BY created_at DESC",
            &[&period_start],
        )?;

        let open_tasks = self.store.query(
            "SELECT id, title, due_date, priority
             FROM tasks
             WHERE status IN ('inbox', 'next', 'waiting') AND deleted_at IS NULL
             ORDER BY priority ASC, due_date IS NULL, due_date ASC
             LIMIT 20",
            &[],
        )?;

        let active_projects = self.store.query(
            "SELECT p.id, p.name,
                    SUM(CASE WHEN t.status IN ('inbox', 'next', 'waiting')
                             AND t.deleted_at IS NULL THEN 1 ELSE 0 END) AS open_tasks_count
             FROM projects p
             LEFT JOIN tasks t ON t.project_id = p.id
             WHERE p.status = 'active' AND p.deleted_at IS NULL
             GROUP BY p.id, p.name
             ORDER BY open_tasks_count DESC
             LIMIT 10",
            &[],
        )?;

        let upcoming_calendar = self.store.query(
            "SELECT e.id, e.title, e.start_time, p.name AS person_name
             FROM calendar_events e
             LEFT JOIN people p ON e.person_id = p.id
             WHERE date(e.start_time) >= ?1 AND date(e.start_time) <= ?2
             ORDER BY e.start_time ASC",
            &[&period_end, &horizon],
        )?;

        let patterns = self.collect_patterns(&period_start)?;

        let mut ctx = serde_json::Map::new();
        ctx.insert("period_start".into(), json!(period_start));
        ctx.insert("period_end".into(), json!(period_end));
        ctx.insert("completed_tasks".into(), rows_json(completed_tasks));
        ctx.insert("new_tasks".into(), rows_json(new_tasks));
        ctx.insert("open_tasks".into(), rows_json(open_tasks));
        ctx.insert("active_projects".into(), rows_json(active_projects));
        ctx.insert("upcoming_calendar".into(), rows_json(upcoming_calendar));
        ctx.insert("patterns".into(), patterns);
        self.agent.execute(&ctx).await
    }

    fn collect_patterns(&self, period_start: &str) -> Result<Value> {
        let by_day = self.store.query(
            "SELECT date(updated_at) AS day, COUNT(*) AS completed
             FROM tasks
             WHERE status = 'done' AND deleted_at IS NULL AND date(updated_at) >= ?1
             GROUP BY day
             ORDER BY completed DESC",
            &[&period_start],
        )?;

        let people_contacted = self.store.query(
            "SELECT DISTINCT p.name
             FROM tasks t
             JOIN people p ON t.person_id = p.id
             WHERE t.deleted_at IS NULL AND date(t.updated_at) >= ?1",
            &[&period_start],
        )?;

        let total: i64 = by_day
            .iter()
            .filter_map(|r| r.get("completed").and_then(Value::as_i64))
            .sum();
        let most_active_day = by_day
            .first()
            .and_then(|r| r.get("day").cloned())
            .unwrap_or(Value::Null);

        Ok(json!({
            "most_active_day": most_active_day,
            "avg_tasks_completed_per_day": total as f64 / 7.0,
            "people_contacted": people_contacted
                .iter()
                .filter_map(|r| r.get("name").cloned())
                .collect::<Vec<_>>(),
        }))
    }
}
