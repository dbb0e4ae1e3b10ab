//! REST handlers for the SDK endpoints and health checks.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thunder_core::snapshot::{CtaResponse, CtaSnapshotRequest};
use thunder_core::ThunderError;
use thunder_decision::SdkService;
use tracing::{error, warn};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "auth-userid";
pub const API_VERSION_HEADER: &str = "api_version";
pub const DEFAULT_TENANT: &str = "default";

/// Oldest SDK API version that receives CTAs.
const MIN_API_VERSION: i64 = 1;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SdkService>,
    pub node_id: String,
    pub start_time: Instant,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn api_error(e: &ThunderError) -> ApiError {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %e, code = e.error_code(), "Request failed");
        metrics::counter!("api.errors").increment(1);
    } else {
        warn!(error = %e, code = e.error_code(), "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.error_code().to_string(),
            message: e.client_message(),
        }),
    )
}

/// Unwraps a JSON body, rendering malformed payloads like every other
/// client error.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| api_error(&ThunderError::InvalidRequest(rejection.body_text())))
}

/// Identity of the caller, taken from the gateway headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: String,
    pub user_id: i64,
    pub api_version: Option<i64>,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ThunderError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let tenant_id = header(TENANT_HEADER).unwrap_or(DEFAULT_TENANT).to_string();

        let user_id = header(USER_HEADER)
            .ok_or_else(|| ThunderError::InvalidRequest(format!("missing '{USER_HEADER}' header")))?
            .parse::<i64>()
            .map_err(|_| ThunderError::InvalidRequest(format!("'{USER_HEADER}' must be numeric")))?;

        let api_version = match header(API_VERSION_HEADER) {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                ThunderError::InvalidRequest(format!("'{API_VERSION_HEADER}' must be numeric"))
            })?),
            None => None,
        };

        Ok(Self {
            tenant_id,
            user_id,
            api_version,
        })
    }

    fn is_legacy_client(&self) -> bool {
        self.api_version.is_some_and(|v| v < MIN_API_VERSION)
    }
}

/// POST /cta/v1/active/state-machines and /cta/active/state-machines
pub async fn active_state_machines(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CtaSnapshotRequest>, JsonRejection>,
) -> Result<Json<CtaResponse>, ApiError> {
    let caller = Caller::from_headers(&headers).map_err(|e| api_error(&e))?;
    let request = json_body(payload)?;
    if caller.is_legacy_client() {
        return Ok(Json(CtaResponse::default()));
    }

    state
        .service
        .app_launch(&caller.tenant_id, caller.user_id, &request)
        .await
        .map(Json)
        .map_err(|e| api_error(&e))
}

#[derive(Debug, Serialize)]
pub struct DeltaResponse {
    pub success: bool,
}

/// POST /cta/state-machines/snapshot/delta
pub async fn snapshot_delta(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CtaSnapshotRequest>, JsonRejection>,
) -> Result<Json<DeltaResponse>, ApiError> {
    let caller = Caller::from_headers(&headers).map_err(|e| api_error(&e))?;
    let request = json_body(payload)?;

    state
        .service
        .merge(&caller.tenant_id, caller.user_id, &request)
        .await
        .map(|_| Json(DeltaResponse { success: true }))
        .map_err(|e| api_error(&e))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub cache_loaded_at: Option<i64>,
}

/// GET /healthcheck
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache_loaded_at: state.service.cache().snapshot().loaded_at,
    })
}

/// GET /healthcheck/ping
pub async fn ping() -> &'static str {
    "pong"
}
