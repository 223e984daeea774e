//! HTTP request handlers for the gateway API.
//!
//! # Endpoints
//!
//! - `GET /api/files?action=folders` - List folders
//! - `GET /api/files[?folder=<name>]` - List files
//! - `GET /api/files?fileId=<id>` - Download a file
//! - `POST /api/files` - Upload a file
//! - `DELETE /api/files` - Delete a file or a folder
//! - `OPTIONS /api/files` - CORS preflight
//! - `GET /api/get-upload-url` - Allocate an upload URL for direct uploads
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{FailedDelete, GatewayError};
use crate::gateway::{base_name, Gateway, NewFile, StoredFile};
use crate::provider::{FileDownload, StorageProvider};

/// Header carrying the provider's content checksum on downloads.
pub const CONTENT_SHA1_HEADER: &str = "x-content-sha1";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the gateway.
pub struct AppState<P: StorageProvider> {
    pub gateway: Arc<Gateway<P>>,
}

impl<P: StorageProvider> AppState<P> {
    pub fn new(gateway: Gateway<P>) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}

impl<P: StorageProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters of `GET /api/files`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesQueryParams {
    /// `folders` selects the folder listing
    #[serde(default)]
    pub action: Option<String>,

    /// Folder to list (relative to the root prefix)
    #[serde(default)]
    pub folder: Option<String>,

    /// File to download
    #[serde(default)]
    pub file_id: Option<String>,
}

/// Body of `POST /api/files`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBody {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_data: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

impl From<UploadBody> for NewFile {
    fn from(body: UploadBody) -> Self {
        Self {
            file_name: body.file_name,
            file_data: body.file_data,
            sha1: body.sha1,
            folder: body.folder,
        }
    }
}

/// Body of `DELETE /api/files`: either `{fileId, fileName}` or `{folder}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// The two delete modes a [`DeleteBody`] can select.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteTarget {
    File { file_id: String, file_name: String },
    Folder(String),
}

impl DeleteBody {
    /// Pick the delete mode from the body shape.
    pub fn target(self) -> Result<DeleteTarget, GatewayError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        let has_file = present(&self.file_id) || present(&self.file_name);
        let has_folder = present(&self.folder);

        match (has_file, has_folder) {
            (true, true) => Err(GatewayError::Validation(
                "Specify either fileId and fileName, or folder, not both".to_string(),
            )),
            (true, false) => match (self.file_id, self.file_name) {
                (Some(file_id), Some(file_name))
                    if !file_id.trim().is_empty() && !file_name.trim().is_empty() =>
                {
                    Ok(DeleteTarget::File { file_id, file_name })
                }
                _ => Err(GatewayError::Validation(
                    "Deleting a file requires both fileId and fileName".to_string(),
                )),
            },
            (false, true) => Ok(DeleteTarget::Folder(self.folder.unwrap_or_default())),
            (false, false) => Err(GatewayError::Validation(
                "Missing fileId and fileName, or folder".to_string(),
            )),
        }
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::Validation(rejection.body_text())
    }
}

impl From<BytesRejection> for GatewayError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge(rejection.body_text())
        } else {
            GatewayError::Validation(rejection.body_text())
        }
    }
}

/// Parse a JSON request body. An empty body reads as `{}`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("Invalid JSON body: {}", e)))
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error envelope returned for all error conditions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,

    /// Short description of what failed
    pub error: String,

    /// Validation message or relayed provider payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Files removed before a folder delete failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_deleted: Option<usize>,

    /// Files a folder delete could not remove
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_files: Option<Vec<FailedDelete>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details,
            files_deleted: None,
            failed_files: None,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct FoldersResponse {
    pub success: bool,
    pub folders: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub success: bool,
    pub files: Vec<StoredFile>,
    pub count: usize,
    pub bucket_name: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file: StoredFile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub files_deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// Response of the upload-URL endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub upload_auth: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert GatewayError to HTTP response.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other 4xx at WARN.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, error) = match &self {
            GatewayError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "validation_error", "Invalid request")
            }
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", "Not found"),
            GatewayError::MethodNotAllowed(_) => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                "Method not allowed",
            ),
            GatewayError::PayloadTooLarge(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request body too large",
            ),
            GatewayError::Auth(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "auth_error",
                "Failed to authorize with storage provider",
            ),
            GatewayError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_error",
                "Storage provider request failed",
            ),
            GatewayError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Gateway is misconfigured",
            ),
            GatewayError::PartialDelete { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "partial_delete",
                "Folder delete partially failed",
            ),
        };

        let message = self.to_string();
        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let response = match self {
            GatewayError::Auth(err) | GatewayError::Upstream(err) => {
                ErrorResponse::new(error, Some(err.details()))
            }
            GatewayError::PartialDelete { deleted, failed } => ErrorResponse {
                files_deleted: Some(deleted),
                failed_files: Some(failed),
                ..ErrorResponse::new(error, Some(serde_json::Value::String(message)))
            },
            _ => ErrorResponse::new(error, Some(serde_json::Value::String(message))),
        };

        (status, Json(response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle `GET /api/files`.
///
/// Dispatches on the query string: `fileId` downloads, `action=folders` lists
/// folders, anything else lists the files of `folder` (or the root).
///
/// # Errors
///
/// - `400 Bad Request`: malformed query, unknown action or invalid folder name
/// - `500 Internal Server Error`: provider or configuration error
pub async fn files_get_handler<P: StorageProvider>(
    State(state): State<AppState<P>>,
    query: Result<Query<FilesQueryParams>, QueryRejection>,
) -> Result<Response, GatewayError> {
    let Query(query) = query?;

    if let Some(file_id) = query.file_id.as_deref() {
        let download = state.gateway.download(file_id).await?;
        return Ok(download_response(download));
    }

    match query.action.as_deref() {
        Some("folders") => {
            let folders = state.gateway.list_folders().await?;
            Ok(Json(FoldersResponse {
                success: true,
                folders,
            })
            .into_response())
        }
        None | Some("") | Some("files") => {
            let list = state.gateway.list_files(query.folder.as_deref()).await?;
            Ok(Json(FilesResponse {
                success: true,
                count: list.files.len(),
                files: list.files,
                bucket_name: list.bucket_name,
            })
            .into_response())
        }
        Some(other) => Err(GatewayError::Validation(format!(
            "Unknown action '{}'",
            other
        ))),
    }
}

/// Handle `POST /api/files`.
///
/// Body: `{"fileName", "fileData" (base64), "sha1", "folder"?}`.
///
/// # Response
///
/// `200 OK` with `{"success": true, "file": {...}}`
///
/// # Errors
///
/// - `400 Bad Request`: invalid JSON or missing fields
/// - `413 Payload Too Large`: body over the configured limit
/// - `500 Internal Server Error`: provider or configuration error
pub async fn files_post_handler<P: StorageProvider>(
    State(state): State<AppState<P>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<UploadResponse>, GatewayError> {
    let body: UploadBody = parse_body(&body?)?;
    let file = state.gateway.upload(body.into()).await?;

    Ok(Json(UploadResponse {
        success: true,
        file,
    }))
}

/// Handle `DELETE /api/files`.
///
/// Body: `{"fileId", "fileName"}` deletes one file, `{"folder"}` deletes every
/// file under the folder.
///
/// # Errors
///
/// - `400 Bad Request`: body matches neither shape
/// - `404 Not Found`: folder is empty
/// - `413 Payload Too Large`: body over the configured limit
/// - `500 Internal Server Error`: provider error, or some folder deletes failed
pub async fn files_delete_handler<P: StorageProvider>(
    State(state): State<AppState<P>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<DeleteResponse>, GatewayError> {
    let body: DeleteBody = parse_body(&body?)?;

    let response = match body.target()? {
        DeleteTarget::File { file_id, file_name } => {
            let deleted = state.gateway.delete_file(&file_id, &file_name).await?;
            DeleteResponse {
                success: true,
                files_deleted: 1,
                file_name: Some(deleted.file_name),
                folder: None,
            }
        }
        DeleteTarget::Folder(folder) => {
            let count = state.gateway.delete_folder(&folder).await?;
            DeleteResponse {
                success: true,
                files_deleted: count,
                file_name: None,
                folder: Some(folder.trim_matches('/').to_string()),
            }
        }
    };

    Ok(Json(response))
}

/// Handle `OPTIONS /api/files` without CORS preflight headers.
pub async fn options_handler() -> StatusCode {
    StatusCode::OK
}

/// Fallback for verbs a route does not support.
pub async fn method_not_allowed_handler(method: Method) -> GatewayError {
    GatewayError::MethodNotAllowed(method.to_string())
}

/// Handle `GET /api/get-upload-url`.
///
/// # Response
///
/// `200 OK` with `{"uploadUrl": "...", "uploadAuth": "..."}`
pub async fn upload_url_handler<P: StorageProvider>(
    State(state): State<AppState<P>>,
) -> Result<Json<UploadUrlResponse>, GatewayError> {
    let target = state.gateway.upload_target().await?;

    Ok(Json(UploadUrlResponse {
        upload_url: target.upload_url,
        upload_auth: target.authorization_token,
    }))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the passthrough response for a download.
///
/// Provider headers that are not valid header values are dropped.
fn download_response(download: FileDownload) -> Response {
    let content_disposition = download.content_disposition.clone().or_else(|| {
        download
            .file_name
            .as_deref()
            .map(|name| format!("attachment; filename=\"{}\"", base_name(name).replace('"', "")))
    });

    let mut response = Response::new(Body::from_stream(download.body));
    let headers = response.headers_mut();

    let content_type = download
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(value) = content_disposition.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = download.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Some(value) = download.sha1.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(CONTENT_SHA1_HEADER, value);
    }

    response
}
