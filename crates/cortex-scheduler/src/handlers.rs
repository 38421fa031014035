//! Built-in job handlers: provider sync and the periodic reports.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use tracing::{info, warn};

use cortex_agents::{DailyReportAgent, WeeklyReportAgent};
use cortex_channels::ReportDispatcher;
use cortex_store::{RowExt, Store};
use cortex_sync::{sync_calendar, ICloudCalendarProvider, ProviderKind, SyncService};

use crate::engine::JobRegistry;

const CALENDAR_HORIZON_DAYS: i64 = 90;

/// Registry with the four built-in jobs.
pub fn build_registry(store: Store, tz: Tz) -> JobRegistry {
    let mut registry = JobRegistry::new();

    registry.register("calendar_sync", {
        let store = store.clone();
        Arc::new(move || -> crate::engine::HandlerFuture {
            let store = store.clone();
            Box::pin(async move { calendar_sync_job(store, tz).await })
        })
    });

    registry.register("contact_sync", {
        let store = store.clone();
        Arc::new(move || -> crate::engine::HandlerFuture {
            let store = store.clone();
            Box::pin(async move { contact_sync_job(store).await })
        })
    });

    registry.register("daily_report", {
        let store = store.clone();
        Arc::new(move || -> crate::engine::HandlerFuture {
            let store = store.clone();
            Box::pin(async move { daily_report_job(store, tz).await })
        })
    });

    registry.register("weekly_report", {
        let store = store.clone();
        Arc::new(move || -> crate::engine::HandlerFuture {
            let store = store.clone();
            Box::pin(async move { weekly_report_job(store, tz).await })
        })
    });

    registry
}

fn today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Pull the next 90 days of events from CalDAV and upsert them locally.
async fn calendar_sync_job(store: Store, tz: Tz) -> Result<(), String> {
    let Some(row) = store
        .query_one(
            "SELECT credentials, write_calendar_id FROM sync_config
             WHERE provider = 'icloud' AND enabled = 1",
            &[],
        )
        .map_err(|e| e.to_string())?
    else {
        warn!("calendar_sync: no enabled icloud configuration");
        return Ok(());
    };

    let credentials = row.json_opt("credentials").unwrap_or_else(|| json!({}));
    let write_calendar_id = row.str_opt("write_calendar_id").map(str::to_string);

    let mut provider = ICloudCalendarProvider::new();
    provider
        .authenticate(&credentials)
        .await
        .map_err(|e| e.to_string())?;

    let start = today(tz);
    let end = start + Duration::days(CALENDAR_HORIZON_DAYS);
    let total = sync_calendar(
        &store,
        &provider,
        write_calendar_id.as_deref(),
        &start.format("%Y%m%d").to_string(),
        &end.format("%Y%m%d").to_string(),
    )
    .await
    .map_err(|e| e.to_string())?;

    info!(events = total, "calendar sync finished");
    Ok(())
}

/// Run one contact sync for every enabled provider.
async fn contact_sync_job(store: Store) -> Result<(), String> {
    let rows = store
        .query(
            "SELECT provider, credentials FROM sync_config WHERE enabled = 1",
            &[],
        )
        .map_err(|e| e.to_string())?;

    if rows.is_empty() {
        warn!("contact_sync: no enabled providers");
        return Ok(());
    }

    let mut failures = Vec::new();
    for row in rows {
        let Some(kind) = row
            .str_opt("provider")
            .and_then(|p| ProviderKind::from_str(p).ok())
        else {
            continue;
        };
        let credentials = row.json_opt("credentials").unwrap_or_else(|| json!({}));

        let mut service = SyncService::new(store.clone());
        if let Err(e) = service.init_provider(kind, &credentials).await {
            failures.push(format!("{kind}: {e}"));
            continue;
        }
        match service.sync_provider(kind).await {
            Ok(stats) => info!(provider = %kind, ?stats, "contact sync finished"),
            Err(e) => failures.push(format!("{kind}: {e}")),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

async fn daily_report_job(store: Store, tz: Tz) -> Result<(), String> {
    let agent = DailyReportAgent::new(store.clone()).map_err(|e| e.to_string())?;
    let mut report = agent
        .generate_from_db(today(tz))
        .await
        .map_err(|e| e.to_string())?;
    report
        .entry("title".to_string())
        .or_insert(json!("Daily Report"));

    let dispatcher = ReportDispatcher::new(store);
    let results = dispatcher
        .dispatch("daily_report", &Value::Object(report))
        .await
        .map_err(|e| e.to_string())?;
    info!(recipients = results.len(), "daily report dispatched");
    Ok(())
}

async fn weekly_report_job(store: Store, tz: Tz) -> Result<(), String> {
    let agent = WeeklyReportAgent::new(store.clone()).map_err(|e| e.to_string())?;
    let mut report = agent
        .generate_from_db(today(tz))
        .await
        .map_err(|e| e.to_string())?;
    report
        .entry("title".to_string())
        .or_insert(json!("Weekly Report"));

    let dispatcher = ReportDispatcher::new(store);
    let results = dispatcher
        .dispatch("weekly_report", &Value::Object(report))
        .await
        .map_err(|e| e.to_string())?;
    info!(recipients = results.len(), "weekly report dispatched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_carries_the_builtin_jobs() {
        let registry = build_registry(
            Store::open_in_memory().unwrap(),
            chrono_tz::Europe::Berlin,
        );
        let mut names = registry.job_names();
        names.sort();
        assert_eq!(
            names,
            vec!["calendar_sync", "contact_sync", "daily_report", "weekly_report"]
        );
    }

    #[tokio::test]
    async fn contact_sync_without_providers_is_a_clean_no_op() {
        let store = Store::open_in_memory().unwrap();
        assert!(contact_sync_job(store).await.is_ok());
    }

    #[tokio::test]
    async fn calendar_sync_without_config_is_a_clean_no_op() {
        let store = Store::open_in_memory().unwrap();
        assert!(calendar_sync_job(store, chrono_tz::Europe::Berlin).await.is_ok());
    }
}
