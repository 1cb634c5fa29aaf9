use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use crate::server::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Viewer,
    Admin,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub admin: Option<(String, String)>,
    pub viewer: Option<(String, String)>,
}

impl Credentials {
    pub fn role_for(&self, authorization: Option<&str>) -> Option<Role> {
        let (user, password) = decode_basic(authorization?)?;
        let granted = |pair: &Option<(String, String)>| {
            pair.as_ref()
                .is_some_and(|(u, p)| *u == user && *p == password)
        };
        if granted(&self.admin) {
            Some(Role::Admin)
        } else if granted(&self.viewer) {
            Some(Role::Viewer)
        } else {
            None
        }
    }
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn role_from_parts(parts: &Parts, state: &AppState) -> Option<Role> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.credentials.role_for(value)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"kiosk-fleet\"")],
        Json(json!({"error": "Authentication required"})),
    )
        .into_response()
}

pub struct RequireViewer;

impl FromRequestParts<Arc<AppState>> for RequireViewer {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        role_from_parts(parts, state)
            .map(|_| Self)
            .ok_or_else(unauthorized)
    }
}

pub struct RequireAdmin;

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match role_from_parts(parts, state) {
            Some(Role::Admin) => Ok(Self),
            Some(Role::Viewer) => Err((
                StatusCode::FORBIDDEN,
                Json(json!({"error": "Admin access required"})),
            )
                .into_response()),
            None => Err(unauthorized()),
        }
    }
}
