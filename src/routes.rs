//! Control plane (SPEC_FULL §2 "ambient"): a thin read-only axum surface for
//! the external operator UI — health, a live-status snapshot, paginated
//! activity history, a redacted config dump, and Prometheus metrics. The
//! core never accepts settings writes here; persistence is the external
//! settings API's job (spec §1 Non-goals).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::activity::ActivityRecorder;
use crate::clock::unix_now;
use crate::config::Config;
use crate::detectors::DiskSpaceDetector;
use crate::event_monitor::{EventMonitor, EventMonitorStatsSnapshot};
use crate::session_store::SessionStore;
use crate::stream_tracker::StreamTracker;

pub struct Metrics {
    registry: Registry,
    stream_count: IntGauge,
    session_count: IntGauge,
    alert_hit: IntGauge,
    filtered: IntGauge,
    errors: IntGauge,
    events_by_type: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let stream_count = IntGauge::new("dvr_sentinel_stream_count", "Unique devices currently streaming").unwrap();
        let session_count = IntGauge::new("dvr_sentinel_active_sessions", "Active live-viewing sessions").unwrap();
        let alert_hit = IntGauge::new("dvr_sentinel_events_alert_hit_total", "Events handled by at least one detector").unwrap();
        let filtered = IntGauge::new("dvr_sentinel_events_filtered_total", "Events no detector wanted").unwrap();
        let errors = IntGauge::new("dvr_sentinel_events_error_total", "Malformed events dropped").unwrap();
        let events_by_type = IntGaugeVec::new(
            Opts::new("dvr_sentinel_events_by_type_total", "Events seen, by upstream Type"),
            &["type"],
        )
        .unwrap();

        registry.register(Box::new(stream_count.clone())).unwrap();
        registry.register(Box::new(session_count.clone())).unwrap();
        registry.register(Box::new(alert_hit.clone())).unwrap();
        registry.register(Box::new(filtered.clone())).unwrap();
        registry.register(Box::new(errors.clone())).unwrap();
        registry.register(Box::new(events_by_type.clone())).unwrap();

        Self {
            registry,
            stream_count,
            session_count,
            alert_hit,
            filtered,
            errors,
            events_by_type,
        }
    }

    fn refresh(&self, stream_count: i64, session_count: i64, stats: &EventMonitorStatsSnapshot) {
        self.stream_count.set(stream_count);
        self.session_count.set(session_count);
        self.alert_hit.set(stats.alert_hit as i64);
        self.filtered.set(stats.filtered as i64);
        self.errors.set(stats.error as i64);
        for (event_type, count) in &stats.total {
            self.events_by_type.with_label_values(&[event_type]).set(*count as i64);
        }
    }

    fn encode(&self) -> String {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf).expect("prometheus encode");
        String::from_utf8(buf).expect("prometheus text is utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub stream_tracker: Option<Arc<StreamTracker>>,
    pub activity: Arc<ActivityRecorder>,
    pub event_monitor: Arc<EventMonitor>,
    pub disk_space: Option<Arc<DiskSpaceDetector>>,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub started_at: u64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/status", axum::routing::get(status))
        .route("/activity", axum::routing::get(activity_history))
        .route("/config", axum::routing::get(config_dump))
        .route("/metrics", axum::routing::get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "dvr-sentinel" }))
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    active_sessions: usize,
    stream_count: Option<usize>,
    events: EventMonitorStatsSnapshot,
    disk_space: Option<crate::detectors::disk_space::DiskSpaceSnapshot>,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let disk_space = match &state.disk_space {
        Some(d) => Some(d.snapshot().await),
        None => None,
    };
    let body = StatusResponse {
        uptime_secs: unix_now().saturating_sub(state.started_at),
        active_sessions: state.sessions.session_count(),
        stream_count: state.stream_tracker.as_ref().map(|t| t.count()),
        events: state.event_monitor.stats_snapshot().await,
        disk_space,
    };
    Json(body)
}

#[derive(Deserialize)]
struct ActivityQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn activity_history(State(state): State<AppState>, Query(query): Query<ActivityQuery>) -> impl IntoResponse {
    match state.activity.read_page(query.offset, query.limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Read-only dump of the effective configuration with provider credentials
/// redacted — this surface is for the operator UI to display current
/// settings, not to leak the pushover/apprise secrets back out over HTTP.
async fn config_dump(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = &state.config;
    Json(json!({
        "channels_dvr_host": cfg.channels_dvr_host,
        "channels_dvr_port": cfg.channels_dvr_port,
        "tz": cfg.tz.to_string(),
        "log_level": cfg.log_level,
        "alert_channel_watching": cfg.alert_channel_watching,
        "alert_vod_watching": cfg.alert_vod_watching,
        "alert_disk_space": cfg.alert_disk_space,
        "alert_recording_events": cfg.alert_recording_events,
        "stream_count": cfg.stream_count,
        "cache_ttls": {
            "channel_secs": cfg.cache_ttls.channel_secs,
            "program_secs": cfg.cache_ttls.program_secs,
            "job_secs": cfg.cache_ttls.job_secs,
            "vod_secs": cfg.cache_ttls.vod_secs,
        },
        "pushover_configured": cfg.pushover.is_configured(),
        "apprise_services_configured": cfg.apprise.service_urls.len(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stream_count = state.stream_tracker.as_ref().map(|t| t.count() as i64).unwrap_or(0);
    let session_count = state.sessions.session_count() as i64;
    let stats = state.event_monitor.stats_snapshot().await;
    state.metrics.refresh(stream_count, session_count, &stats);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::detector::Detector;
    use axum_test::TestServer;

    fn test_config() -> Config {
        std::env::set_var("channels_dvr_host", "127.0.0.1");
        Config::from_env().unwrap()
    }

    fn server(dir: &std::path::Path) -> TestServer {
        let detectors: Vec<Arc<dyn Detector>> = vec![];
        let state = AppState {
            sessions: Arc::new(SessionStore::new()),
            stream_tracker: Some(Arc::new(StreamTracker::new(dir))),
            activity: Arc::new(ActivityRecorder::new(dir)),
            event_monitor: Arc::new(EventMonitor::new("http://127.0.0.1:8089", detectors)),
            disk_space: None,
            config: Arc::new(test_config()),
            metrics: Arc::new(Metrics::new()),
            started_at: unix_now(),
        };
        TestServer::new(create_router(state)).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path()).get("/health").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn status_reports_session_and_stream_counts() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path()).get("/status").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["active_sessions"], 0);
        assert_eq!(body["stream_count"], 0);
    }

    #[tokio::test]
    async fn activity_history_is_empty_for_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path()).get("/activity").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path()).get("/metrics").await;
        response.assert_status_ok();
        let body = response.text();
        assert!(body.contains("dvr_sentinel_stream_count"));
    }
}
