use crate::bus::Bus;
use crate::collectors::system::SystemSnapshot;
use crate::log_store::LogStore;
use crate::metrics::Metrics;
use crate::model::{LogEntry, StatusSnapshot};
use crate::poller::{PollerError, PollerHandle, PollerPhase};
use crate::shutdown::Shutdown;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct View {
    pub status: Option<Arc<StatusSnapshot>>,
    pub system: Option<Arc<SystemSnapshot>>,
    pub last_entry: Option<Arc<LogEntry>>,
}

pub type SharedView = Arc<RwLock<View>>;

/// Bus subscriptions taken up front so nothing published before the task starts is missed.
pub struct ViewFeed {
    status: broadcast::Receiver<Arc<StatusSnapshot>>,
    entries: broadcast::Receiver<Arc<LogEntry>>,
    system: broadcast::Receiver<Arc<SystemSnapshot>>,
}

impl ViewFeed {
    pub fn subscribe(bus: &Bus) -> Self {
        Self {
            status: bus.subscribe_status(),
            entries: bus.subscribe_entries(),
            system: bus.subscribe_system(),
        }
    }

    pub async fn run(mut self, view: SharedView, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();
        let (mut status_open, mut entries_open, mut system_open) = (true, true, true);

        while status_open || entries_open || system_open {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => break,
                msg = self.status.recv(), if status_open => match msg {
                    Ok(snapshot) => view.write().await.status = Some(snapshot),
                    Err(err) => status_open = keep_open("status", err),
                },
                msg = self.entries.recv(), if entries_open => match msg {
                    Ok(entry) => view.write().await.last_entry = Some(entry),
                    Err(err) => entries_open = keep_open("entries", err),
                },
                msg = self.system.recv(), if system_open => match msg {
                    Ok(snapshot) => view.write().await.system = Some(snapshot),
                    Err(err) => system_open = keep_open("system", err),
                },
            }
        }
    }
}

fn keep_open(channel: &'static str, err: RecvError) -> bool {
    match err {
        RecvError::Lagged(skipped) => {
            debug!(channel, skipped, "view fell behind the bus");
            true
        }
        RecvError::Closed => false,
    }
}

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub view: SharedView,
    pub store: LogStore,
    pub poller: PollerHandle,
    pub shutdown: Shutdown,
    pub started_at: DateTime<Local>,
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    started_at: DateTime<Local>,
    phase: PollerPhase,
    status: Option<&'a StatusSnapshot>,
    last_entry: Option<&'a LogEntry>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    date: Option<String>,
}

#[derive(Serialize)]
struct LogsResponse {
    date: NaiveDate,
    entries: Vec<LogEntry>,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/api/system", get(system_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/probe", post(probe_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn status_handler(State(state): State<HttpAppState>) -> Response {
    let guard = state.view.read().await;
    let response = Json(StatusResponse {
        started_at: state.started_at,
        phase: state.poller.phase(),
        status: guard.status.as_deref(),
        last_entry: guard.last_entry.as_deref(),
    })
    .into_response();
    drop(guard);
    response
}

async fn system_handler(State(state): State<HttpAppState>) -> Response {
    let guard = state.view.read().await;
    let response = match guard.system.as_deref() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no system sample yet").into_response(),
    };
    drop(guard);
    response
}

async fn logs_handler(
    State(state): State<HttpAppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let date = match query.date.as_deref().map(str::trim) {
        None | Some("") => Local::now().date_naive(),
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid date '{raw}', expected YYYY-MM-DD"),
                )
                    .into_response()
            }
        },
    };

    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.query(date)).await {
        Ok(entries) => Json(LogsResponse { date, entries }).into_response(),
        Err(err) => {
            warn!(error = %err, "log query task failed");
            Json(LogsResponse {
                date,
                entries: Vec::new(),
            })
            .into_response()
        }
    }
}

async fn probe_handler(State(state): State<HttpAppState>) -> Response {
    match state.poller.probe_now().await {
        Ok(snapshot) => Json(&*snapshot).into_response(),
        Err(err @ PollerError::Stopped) => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
        Err(err @ PollerError::Cycle(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn shutdown_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    if state.shutdown.trigger() {
        info!("shutdown requested over HTTP");
    }
    (StatusCode::ACCEPTED, "stopping")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, GpuSlots};
    use crate::notifier::{NoopNotifier, NotificationDispatcher};
    use crate::poller::{Poller, PollerSettings};
    use crate::probe::tests::{gpu, hdmi};
    use crate::probe::HardwareProbe;
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct HealthyProbe;

    impl HardwareProbe for HealthyProbe {
        fn probe(&self) -> StatusSnapshot {
            let mut gpus = GpuSlots::new();
            gpus.insert("gpu_0", gpu("RTX", 0));
            StatusSnapshot::assemble(Local::now(), vec![hdmi(true)], gpus, None, None)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state: HttpAppState,
        bus: Bus,
        poller: Option<Poller>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().join("hdmi_monitor_log.json"));
        let metrics = Metrics::new().expect("metrics");
        let bus = Bus::new(8);
        let (dispatcher, _worker) = NotificationDispatcher::spawn(
            Arc::new(NoopNotifier),
            4,
            Duration::from_secs(1),
            metrics.clone(),
        );
        let (poller, handle) = Poller::new(
            Arc::new(HealthyProbe),
            store.clone(),
            dispatcher,
            bus.clone(),
            metrics.clone(),
            PollerSettings {
                interval: Duration::from_secs(3600),
                notification_title: "HDMI status".to_string(),
                notify_on_cycle_error: false,
            },
        );
        let state = HttpAppState {
            metrics,
            view: SharedView::default(),
            store,
            poller: handle,
            shutdown: Shutdown::new(),
            started_at: Local::now(),
        };
        Fixture {
            _dir: dir,
            state,
            bus,
            poller: Some(poller),
        }
    }

    async fn call(state: &HttpAppState, method: &str, uri: &str) -> (StatusCode, String) {
        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let f = fixture();
        let (status, body) = call(&f.state, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn metrics_contains_uptime() {
        let f = fixture();
        let (status, body) = call(&f.state, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("hdmiwatch_uptime_seconds"));
    }

    #[tokio::test]
    async fn status_is_empty_before_first_probe() {
        let f = fixture();
        let (status, body) = call(&f.state, "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["phase"], "idle");
        assert!(json["status"].is_null());

        let (status, _) = call(&f.state, "GET", "/api/system").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn view_follows_the_bus() {
        let f = fixture();
        let feed = ViewFeed::subscribe(&f.bus);
        let view_task = tokio::spawn(feed.run(f.state.view.clone(), f.state.shutdown.clone()));

        let mut gpus = GpuSlots::new();
        gpus.insert("gpu_0", gpu("RTX", 0));
        let snapshot = StatusSnapshot::assemble(Local::now(), vec![hdmi(true)], gpus, None, None);
        f.bus.publish_entry(Arc::new(LogEntry::new(
            snapshot.timestamp,
            snapshot.clone(),
            EventKind::Normal,
        )));
        f.bus.publish_status(Arc::new(snapshot));

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                {
                    let view = f.state.view.read().await;
                    if view.status.is_some() && view.last_entry.is_some() {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("view never caught up");

        let (_, body) = call(&f.state, "GET", "/api/status").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"]["hdmi_connected"], true);
        assert_eq!(json["last_entry"]["event_type"], "NORMAL");

        f.state.shutdown.trigger();
        view_task.await.unwrap();
    }

    #[tokio::test]
    async fn logs_reject_malformed_dates() {
        let f = fixture();
        let (status, _) = call(&f.state, "GET", "/api/logs?date=14-03-2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn probe_runs_a_cycle_and_logs_are_queryable() {
        let mut f = fixture();
        let poller = f.poller.take().unwrap();
        let task = tokio::spawn(poller.run(f.state.shutdown.clone()));

        let (status, body) = call(&f.state, "POST", "/api/probe").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"hdmi_connected\":true"));

        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let (status, body) = call(&f.state, "GET", &format!("/api/logs?date={today}")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);

        let (status, _) = call(&f.state, "GET", "/api/logs").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&f.state, "POST", "/api/shutdown").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(f.state.shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn probe_on_stopped_poller_is_unavailable() {
        let mut f = fixture();
        drop(f.poller.take());
        let (status, _) = call(&f.state, "POST", "/api/probe").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
