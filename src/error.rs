use serde::Serialize;
use thiserror::Error;

/// Errors returned by a storage provider client
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Key id or application key was not configured
    #[error("Missing provider credentials: {0}")]
    MissingCredentials(&'static str),

    /// The provider rejected the credentials or the session token (HTTP 401)
    #[error("Unauthorized ({code}): {message}")]
    Unauthorized { code: String, message: String },

    /// Any other error payload returned by the provider API
    #[error("Provider API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Response body could not be decoded
    #[error("Invalid provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the provider rejected a previously valid session token.
    ///
    /// These are the only errors that justify dropping the cached session and
    /// authorizing again. A rejected key pair (`unauthorized`) is terminal.
    pub fn is_session_rejected(&self) -> bool {
        matches!(
            self,
            ProviderError::Unauthorized { code, .. }
                if code == "expired_auth_token" || code == "bad_auth_token"
        )
    }

    /// Provider payload relayed to clients in the `details` field.
    pub fn details(&self) -> serde_json::Value {
        match self {
            ProviderError::Unauthorized { code, message } => serde_json::json!({
                "status": 401,
                "code": code,
                "message": message,
            }),
            ProviderError::Api {
                status,
                code,
                message,
            } => serde_json::json!({
                "status": status,
                "code": code,
                "message": message,
            }),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

/// A single object that could not be removed during a folder delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDelete {
    pub file_name: String,
    pub error: String,
}

/// Errors surfaced by gateway operations.
///
/// Every variant maps to exactly one HTTP status (see the `IntoResponse`
/// implementation in the server layer).
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Missing or malformed request fields (400)
    #[error("{0}")]
    Validation(String),

    /// Nothing matched the request (404)
    #[error("{0}")]
    NotFound(String),

    /// Unsupported HTTP verb (405)
    #[error("Method {0} is not allowed")]
    MethodNotAllowed(String),

    /// Request body over the configured size limit (413)
    #[error("{0}")]
    PayloadTooLarge(String),

    /// The provider rejected the configured credentials (500)
    #[error("Provider authorization failed: {0}")]
    Auth(ProviderError),

    /// Any other provider failure (500)
    #[error("Provider request failed: {0}")]
    Upstream(ProviderError),

    /// Missing credentials or bucket configuration (500)
    #[error("Gateway is not configured: {0}")]
    Config(String),

    /// Some deletes of a folder batch failed while others went through (500)
    #[error("Deleted {deleted} file(s); {} delete(s) failed", .failed.len())]
    PartialDelete {
        deleted: usize,
        failed: Vec<FailedDelete>,
    },
}

impl GatewayError {
    /// Classify a failure of the authorize call.
    ///
    /// Only here does a 401 mean the configured key pair was rejected. A 401
    /// on any other call (a key missing a capability, say) is an upstream
    /// failure like the rest.
    pub fn from_authorize(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized { .. } => GatewayError::Auth(err),
            other => other.into(),
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingCredentials(what) => {
                GatewayError::Config(format!("{} is not set", what))
            }
            other => GatewayError::Upstream(other),
        }
    }
}
