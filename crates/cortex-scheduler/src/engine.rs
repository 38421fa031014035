//! DB-driven job scheduler.
//!
//! Jobs live in `scheduled_jobs ⋈ schedules`; the engine ticks, fires due
//! jobs on spawned tasks, and keeps `next_run` a pure function of the last
//! completion and the trigger. One execution per job name at a time; an
//! overlapping tick is a counted no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cortex_store::{now_rfc3339, Row, RowExt, Store};

use crate::error::{Result, SchedulerError};
use crate::trigger::Trigger;

pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;
pub type JobHandler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// Maps `job_name` to its handler.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_name: &str, handler: JobHandler) {
        self.handlers.insert(job_name.to_string(), handler);
    }

    pub fn get(&self, job_name: &str) -> Option<JobHandler> {
        self.handlers.get(job_name).cloned()
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReceipt {
    pub execution_id: String,
    pub status: RunStatus,
}

struct Inner {
    store: Store,
    registry: JobRegistry,
    in_flight: DashMap<String, ()>,
    tz: Tz,
    tick: Duration,
    shutdown_grace: Duration,
}

/// Cloneable scheduler handle; `run` drives the tick loop, `run_now` serves
/// the manual execution API.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        registry: JobRegistry,
        tz: Tz,
        tick: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                in_flight: DashMap::new(),
                tz,
                tick,
                shutdown_grace,
            }),
        }
    }

    fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.inner.tz).naive_local()
    }

    /// Local wall time → stored UTC RFC 3339 string. DST gaps resolve to the
    /// earliest valid instant.
    fn to_utc_string(&self, local: NaiveDateTime) -> String {
        match self.inner.tz.from_local_datetime(&local).earliest() {
            Some(dt) => dt.with_timezone(&Utc).to_rfc3339(),
            None => local.and_utc().to_rfc3339(),
        }
    }

    /// Main loop. Ticks until `shutdown` flips, then drains running jobs for
    /// a bounded grace period.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.inner.tick.as_secs(), "scheduler started");
        let mut interval = tokio::time::interval(self.inner.tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Wait for running handlers, then mark stragglers aborted.
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.inner.shutdown_grace;
        while !self.inner.in_flight.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for entry in self.inner.in_flight.iter() {
            let job_name = entry.key().clone();
            warn!(job = %job_name, "job aborted by shutdown");
            let _ = self.inner.store.exec(
                "UPDATE scheduled_jobs
                 SET last_error = 'aborted', error_count = error_count + 1, updated_at = ?1
                 WHERE job_name = ?2",
                &[&now_rfc3339(), &job_name],
            );
        }
    }

    /// One pass over the enabled jobs: initialise missing next_run values,
    /// fire everything due.
    pub fn tick(&self) -> Result<()> {
        let rows = self.inner.store.query(
            "SELECT j.job_name, j.next_run,
                    s.type, s.interval_minutes, s.time_of_day, s.day_of_week, s.day_of_month
             FROM scheduled_jobs j
             JOIN schedules s ON j.schedule_id = s.id
             WHERE j.enabled = 1 AND s.enabled = 1",
            &[],
        )?;

        let now = Utc::now();
        for row in rows {
            let Some(job_name) = row.str_opt("job_name").map(str::to_string) else {
                continue;
            };
            let Some(trigger) = Trigger::from_schedule_row(&row) else {
                warn!(job = %job_name, "schedule row is incomplete, skipping");
                continue;
            };

            match row.str_opt("next_run") {
                None => {
                    // Fresh job: plan the first run, fire nothing yet.
                    if let Some(next) = trigger.next_run(self.now_local()) {
                        self.persist_next_run(&job_name, &self.to_utc_string(next))?;
                    }
                }
                Some(next_run) => {
                    let due = DateTime::parse_from_rfc3339(next_run)
                        .map(|dt| dt.with_timezone(&Utc) <= now)
                        .unwrap_or(true);
                    if due {
                        self.fire(&job_name, Some(trigger));
                    }
                }
            }
        }
        Ok(())
    }

    /// Spawn one job execution unless the same job is already in flight.
    /// Returns false on the skipped no-op.
    fn fire(&self, job_name: &str, trigger: Option<Trigger>) -> bool {
        if self
            .inner
            .in_flight
            .insert(job_name.to_string(), ())
            .is_some()
        {
            debug!(job = %job_name, "previous run still in flight, tick skipped");
            return false;
        }

        let scheduler = self.clone();
        let job_name = job_name.to_string();
        tokio::spawn(async move {
            scheduler.execute(&job_name, trigger).await;
            scheduler.inner.in_flight.remove(&job_name);
        });
        true
    }

    async fn execute(&self, job_name: &str, trigger: Option<Trigger>) {
        let Some(handler) = self.inner.registry.get(job_name) else {
            warn!(job = %job_name, "no handler registered");
            let _ = self.inner.store.exec(
                "UPDATE scheduled_jobs
                 SET last_error = 'no handler registered', error_count = error_count + 1,
                     updated_at = ?1
                 WHERE job_name = ?2",
                &[&now_rfc3339(), &job_name],
            );
            return;
        };

        info!(job = %job_name, "executing job");
        let result = handler().await;

        // next_run is a function of the completion instant and the trigger.
        let next = trigger
            .and_then(|t| t.next_run(self.now_local()))
            .map(|n| self.to_utc_string(n));
        let now = now_rfc3339();

        let update = match result {
            Ok(()) => {
                info!(job = %job_name, next_run = ?next, "job finished");
                self.inner.store.exec(
                    "UPDATE scheduled_jobs
                     SET last_run = ?1, next_run = ?2, run_count = run_count + 1, updated_at = ?1
                     WHERE job_name = ?3",
                    &[&now, &next, &job_name],
                )
            }
            Err(message) => {
                error!(job = %job_name, error = %message, "job failed");
                self.inner.store.exec(
                    "UPDATE scheduled_jobs
                     SET last_run = ?1, next_run = ?2, error_count = error_count + 1,
                         last_error = ?3, updated_at = ?1
                     WHERE job_name = ?4",
                    &[&now, &next, &message, &job_name],
                )
            }
        };
        if let Err(e) = update {
            error!(job = %job_name, error = %e, "job bookkeeping failed");
        }
    }

    fn persist_next_run(&self, job_name: &str, next_run: &str) -> Result<()> {
        self.inner.store.exec(
            "UPDATE scheduled_jobs SET next_run = ?1, updated_at = ?2 WHERE job_name = ?3",
            &[&next_run, &now_rfc3339(), &job_name],
        )?;
        Ok(())
    }

    /// Manual one-shot execution. Honors single flight: when the job is
    /// already running, no second execution starts.
    pub fn run_now(&self, job_name: &str) -> Result<RunReceipt> {
        let row = self.inner.store.query_one(
            "SELECT j.job_name,
                    s.type, s.interval_minutes, s.time_of_day, s.day_of_week, s.day_of_month
             FROM scheduled_jobs j
             LEFT JOIN schedules s ON j.schedule_id = s.id
             WHERE j.job_name = ?1",
            &[&job_name],
        )?;
        let Some(row) = row else {
            return Err(SchedulerError::JobNotFound(job_name.to_string()));
        };
        if self.inner.registry.get(job_name).is_none() {
            return Err(SchedulerError::NoHandler(job_name.to_string()));
        }

        let trigger = Trigger::from_schedule_row(&row);
        let started = self.fire(job_name, trigger);
        Ok(RunReceipt {
            execution_id: Uuid::new_v4().to_string(),
            status: if started {
                RunStatus::Queued
            } else {
                RunStatus::Running
            },
        })
    }

    /// Jobs joined with their schedule names, for the admin surface.
    pub fn list_jobs(&self) -> Result<Vec<Row>> {
        Ok(self.inner.store.query(
            "SELECT j.id, j.job_name, j.schedule_id, j.enabled, j.last_run, j.next_run,
                    j.run_count, j.error_count, j.last_error, s.name AS schedule_name
             FROM scheduled_jobs j
             LEFT JOIN schedules s ON j.schedule_id = s.id
             ORDER BY j.id",
            &[],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let now = now_rfc3339();
        store
            .exec(
                "INSERT INTO schedules (name, type, interval_minutes, enabled, created_at, updated_at)
                 VALUES ('every-5', 'interval', 5, 1, ?1, ?1)",
                &[&now],
            )
            .unwrap();
        store
            .exec(
                "INSERT INTO scheduled_jobs (job_name, schedule_id, enabled, created_at, updated_at)
                 VALUES ('contact_sync', 1, 1, ?1, ?1)",
                &[&now],
            )
            .unwrap();
        store
    }

    fn counting_registry(counter: Arc<AtomicUsize>, delay: Duration) -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register(
            "contact_sync",
            Arc::new(move || -> HandlerFuture {
                let counter = counter.clone();
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        registry
    }

    fn scheduler(store: Store, registry: JobRegistry) -> Scheduler {
        Scheduler::new(
            store,
            registry,
            chrono_tz::Europe::Berlin,
            Duration::from_secs(30),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn first_tick_plans_without_firing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let store = seeded_store();
        let s = scheduler(store.clone(), counting_registry(counter.clone(), Duration::ZERO));

        s.tick().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        let row = store
            .query_one("SELECT next_run FROM scheduled_jobs", &[])
            .unwrap()
            .unwrap();
        assert!(row.str_opt("next_run").is_some());
    }

    #[tokio::test]
    async fn due_job_fires_and_advances_next_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let store = seeded_store();
        store
            .exec(
                "UPDATE scheduled_jobs SET next_run = '2020-01-01T00:00:00+00:00'",
                &[],
            )
            .unwrap();
        let s = scheduler(store.clone(), counting_registry(counter.clone(), Duration::ZERO));

        s.tick().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let row = store
            .query_one("SELECT next_run, run_count, last_run FROM scheduled_jobs", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.i64_opt("run_count"), Some(1));
        assert!(row.str_opt("last_run").is_some());
        let next = DateTime::parse_from_rfc3339(row.str_opt("next_run").unwrap()).unwrap();
        assert!(next.with_timezone(&Utc) > Utc::now());
    }

    #[tokio::test]
    async fn run_now_is_single_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let store = seeded_store();
        let s = scheduler(
            store,
            counting_registry(counter.clone(), Duration::from_millis(200)),
        );

        let first = s.run_now("contact_sync").unwrap();
        assert_eq!(first.status, RunStatus::Queued);

        // The handler is still sleeping: a second submission must not start
        // another execution.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = s.run_now("contact_sync").unwrap();
        assert_eq!(second.status, RunStatus::Running);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_now_unknown_job_is_not_found() {
        let store = seeded_store();
        let s = scheduler(store, JobRegistry::new());
        assert!(matches!(
            s.run_now("no_such_job").unwrap_err(),
            SchedulerError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_next_run_still_advances() {
        let store = seeded_store();
        store
            .exec(
                "UPDATE scheduled_jobs SET next_run = '2020-01-01T00:00:00+00:00'",
                &[],
            )
            .unwrap();

        let mut registry = JobRegistry::new();
        registry.register(
            "contact_sync",
            Arc::new(|| -> HandlerFuture { Box::pin(async { Err("auth failed".to_string()) }) }),
        );
        let s = scheduler(store.clone(), registry);

        s.tick().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let row = store
            .query_one(
                "SELECT error_count, last_error, next_run, run_count FROM scheduled_jobs",
                &[],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.i64_opt("error_count"), Some(1));
        assert_eq!(row.str_opt("last_error"), Some("auth failed"));
        assert_eq!(row.i64_opt("run_count"), Some(0));
        assert!(row.str_opt("next_run").is_some());
    }

    #[tokio::test]
    async fn list_jobs_includes_schedule_name() {
        let store = seeded_store();
        let s = scheduler(store, JobRegistry::new());
        let jobs = s.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].str_opt("schedule_name"), Some("every-5"));
    }
}
