use thiserror::Error;

pub type ThunderResult<T> = Result<T, ThunderError>;

/// Failures that cross a component boundary. Not-found, expired and malformed
/// snapshot data are handled inside the engine and never show up here.
#[derive(Error, Debug)]
pub enum ThunderError {
    #[error("tenant not authorised for the resource: {0}")]
    TenantNotAuthorised(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Static data cache refresh failed: {0}")]
    CacheRefresh(String),

    #[error("State machine store error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ThunderError {
    /// Stable code surfaced to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            ThunderError::TenantNotAuthorised(_) => "TENANT_NOT_AUTHORISED_EXCEPTION",
            ThunderError::InvalidRequest(_) => "INVALID_REQUEST_EXCEPTION",
            ThunderError::CacheRefresh(_) => "CACHE_REFRESH_EXCEPTION",
            ThunderError::Storage(_) => "STATE_MACHINE_STORE_EXCEPTION",
            ThunderError::Config(_) => "CONFIG_EXCEPTION",
            ThunderError::Serialization(_) => "SERIALIZATION_EXCEPTION",
            ThunderError::Internal(_) => "thunder-api-UNKNOWN-EXCEPTION",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ThunderError::TenantNotAuthorised(_) => 403,
            ThunderError::InvalidRequest(_) => 400,
            ThunderError::CacheRefresh(_) | ThunderError::Storage(_) => 503,
            ThunderError::Config(_)
            | ThunderError::Serialization(_)
            | ThunderError::Internal(_) => 500,
        }
    }

    /// Message safe to hand to clients; upstream details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ThunderError::TenantNotAuthorised(_) | ThunderError::InvalidRequest(_) => {
                self.to_string()
            }
            ThunderError::CacheRefresh(_) | ThunderError::Storage(_) => {
                "Upstream dependency unavailable".to_string()
            }
            _ => "Something went wrong".to_string(),
        }
    }
}
