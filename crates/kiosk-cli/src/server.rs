use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use kiosk_core::alerts::identity_change_message;
use kiosk_core::report::{fleet_overview, uptime_grid};
use kiosk_core::{Clock, FleetError, FleetStore, Heartbeat, IdentityChange, RawIdentity};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::auth::{Credentials, RequireAdmin, RequireViewer};
use crate::notify::Notifier;

// A full year of play log lines runs to tens of megabytes.
pub const MAX_SNAPSHOT_BYTES: usize = 128 * 1024 * 1024;

pub struct AppState {
    pub store: Arc<FleetStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Notifier,
    pub credentials: Credentials,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/heartbeat", post(handle_heartbeat))
        .route(
            "/upload_json/{filename}",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_SNAPSHOT_BYTES)),
        )
        .route("/api/kiosks", get(handle_overview))
        .route("/api/kiosks/{id}", delete(handle_delete_kiosk))
        .route("/api/kiosks/{id}/uptime", get(handle_uptime))
        .route("/api/kiosks/{id}/summary", get(handle_summary))
        .route("/api/kiosks/{id}/configure", post(handle_configure))
        .route(
            "/api/kiosks/{id}/videos/{filename}",
            delete(handle_delete_video),
        )
        .route(
            "/api/kiosks/{id}/videos/{filename}/reset",
            post(handle_reset_video),
        )
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

fn fleet_error_response(err: FleetError) -> Response {
    match err {
        FleetError::MissingDeviceId => error_response(StatusCode::BAD_REQUEST, "Missing deviceId"),
        FleetError::UnknownKiosk(id) => {
            error_response(StatusCode::NOT_FOUND, format!("Unknown kiosk: {id}"))
        }
        FleetError::InvalidSnapshot(reason) => {
            error_response(StatusCode::BAD_REQUEST, format!("Invalid snapshot: {reason}"))
        }
        err => {
            error!(error=%err, "request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

fn announce_identity_change(notifier: &Notifier, change: Option<&IdentityChange>) {
    let Some(change) = change.filter(|c| c.notify) else {
        return;
    };
    let (subject, body) = identity_change_message(change);
    notifier.alert(subject, body);
}

async fn handle_heartbeat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let heartbeat: Heartbeat = match serde_json::from_slice(&body) {
        Ok(heartbeat) => heartbeat,
        Err(err) => {
            debug!(error=%err, "unparseable heartbeat");
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    match state.store.ingest_heartbeat(&heartbeat, state.clock.now()) {
        Ok(outcome) => {
            announce_identity_change(&state.notifier, outcome.identity_change.as_ref());
            if let Some((subject, body)) = outcome.recovery {
                state.notifier.alert(subject, body);
            }
            Json(json!({"status": "ok", "id": outcome.id})).into_response()
        }
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Response {
    match state
        .store
        .ingest_snapshot(&filename, &body, state.clock.now())
    {
        Ok(outcome) => {
            announce_identity_change(&state.notifier, outcome.identity_change.as_ref());
            Json(json!({
                "status": "ok",
                "id": outcome.id,
                "backpatched": outcome.backpatched,
            }))
            .into_response()
        }
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_overview(_viewer: RequireViewer, State(state): State<Arc<AppState>>) -> Response {
    Json(fleet_overview(&state.store, state.clock.now())).into_response()
}

async fn handle_uptime(
    _viewer: RequireViewer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match uptime_grid(&state.store, &id, state.clock.now()) {
        Ok(grid) => Json(grid).into_response(),
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_summary(
    _viewer: RequireViewer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if state.store.kiosk(&id).is_none() && state.store.mapping(&id).is_none() {
        return fleet_error_response(FleetError::UnknownKiosk(id));
    }
    let today = state.clock.now().date_naive();
    Json(state.store.video_summary(&id, today)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureRequest {
    #[serde(default, alias = "kiosk_name", alias = "kioskName")]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "kiosk_code", alias = "kioskCode")]
    pub code: Option<String>,
    #[serde(default, alias = "kiosk_address", alias = "kioskAddress")]
    pub address: Option<String>,
}

impl From<ConfigureRequest> for RawIdentity {
    fn from(req: ConfigureRequest) -> Self {
        RawIdentity {
            name: req.name,
            country: req.country,
            code: req.code,
            address: req.address,
        }
    }
}

async fn handle_configure(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ConfigureRequest>,
) -> Response {
    let raw = RawIdentity::from(req);
    match state.store.configure(&id, &raw, state.clock.now()) {
        Ok(change) => {
            info!(kiosk_id=%id, changed = change.is_some(), "kiosk configured");
            announce_identity_change(&state.notifier, change.as_ref());
            Json(json!({"status": "ok", "changed": change.is_some()})).into_response()
        }
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_reset_video(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    match state.store.reset_video(&id, &filename) {
        Ok(true) => {
            info!(kiosk_id=%id, video=%filename, "video stats reset");
            Json(json!({"status": "ok"})).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Unknown video: {filename}")),
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_delete_video(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, filename)): Path<(String, String)>,
) -> Response {
    match state.store.delete_video(&id, &filename) {
        Ok(true) => {
            info!(kiosk_id=%id, video=%filename, "video removed");
            Json(json!({"status": "ok"})).into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Unknown video: {filename}")),
        Err(err) => fleet_error_response(err),
    }
}

async fn handle_delete_kiosk(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_kiosk(&id) {
        Ok(true) => Json(json!({"status": "ok"})).into_response(),
        Ok(false) => fleet_error_response(FleetError::UnknownKiosk(id)),
        Err(err) => fleet_error_response(err),
    }
}
