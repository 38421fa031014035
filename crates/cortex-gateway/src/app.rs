use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use chrono_tz::Tz;
use dashmap::DashMap;

use cortex_channels::{NotificationService, TelegramCommandHandler};
use cortex_core::CortexConfig;
use cortex_pipeline::IntentPipeline;
use cortex_scheduler::Scheduler;
use cortex_store::{ConfigManager, Store};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CortexConfig,
    pub store: Store,
    pub settings: Arc<ConfigManager>,
    pub pipeline: Arc<IntentPipeline>,
    pub scheduler: Scheduler,
    pub notifier: Arc<NotificationService>,
    pub commands: TelegramCommandHandler,
    /// Web notification queue: channel_id -> pending messages, drained by
    /// `GET /api/notifications`. Shared with the pipeline notifier.
    pub web_notifications: Arc<DashMap<String, Vec<String>>>,
}

impl AppState {
    pub fn timezone(&self) -> Tz {
        self.settings
            .timezone()
            .parse()
            .unwrap_or(chrono_tz::Europe::Berlin)
    }

    pub fn today(&self) -> chrono::NaiveDate {
        chrono::Utc::now().with_timezone(&self.timezone()).date_naive()
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/api/scheduler/schedules",
            get(crate::http::schedules::list).post(crate::http::schedules::create),
        )
        .route(
            "/api/scheduler/schedules/{id}",
            get(crate::http::schedules::get_one)
                .put(crate::http::schedules::update)
                .delete(crate::http::schedules::delete),
        )
        .route("/api/scheduler/jobs", get(crate::http::jobs::list))
        .route("/api/scheduler/jobs/{id}", put(crate::http::jobs::update))
        .route("/api/scheduler/jobs/{id}/run", post(crate::http::jobs::run))
        .route("/api/inbox", post(crate::http::inbox::inbox))
        .route(
            "/api/clarifications",
            get(crate::http::inbox::pending_clarifications),
        )
        .route(
            "/api/clarifications/{id}",
            post(crate::http::inbox::respond_clarification),
        )
        .route("/api/logs", get(crate::http::inbox::inbox_logs))
        .route("/api/notifications", get(crate::http::inbox::notifications))
        .route("/api/sync/status", get(crate::http::sync::status))
        .route("/api/sync/logs", get(crate::http::sync::logs))
        .route(
            "/telegram/webhook",
            post(crate::http::telegram::webhook_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
