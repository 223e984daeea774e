//! Test utilities for integration tests.
//!
//! This module provides an in-memory [`StorageProvider`] that records every
//! call it receives, and a mock B2 HTTP server for driving the real
//! [`B2Client`](b2_gateway::B2Client) end to end.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use b2_gateway::error::ProviderError;
use b2_gateway::gateway::{Gateway, GatewaySettings};
use b2_gateway::provider::{
    AllowedScope, Bucket, DeletedFile, FileDownload, FileListing, FileRecord, ListFileNames,
    Session, StorageProvider, UploadRequest, UploadTarget,
};
use b2_gateway::{create_router, RouterConfig};

pub const BUCKET_ID: &str = "bucket-1";
pub const BUCKET_NAME: &str = "gateway-files";

/// SHA-1 of the ASCII string `hello`.
pub const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

/// `hello` in standard base64.
pub const HELLO_BASE64: &str = "aGVsbG8=";

// =============================================================================
// Mock Provider with Call Tracking
// =============================================================================

/// A stored object in the mock provider.
#[derive(Debug, Clone)]
pub struct MockObject {
    pub file_id: String,
    pub content: Bytes,
    pub content_type: String,
    pub sha1: String,
}

#[derive(Default)]
struct MockState {
    objects: Mutex<BTreeMap<String, MockObject>>,
    failing_deletes: Mutex<HashSet<String>>,
    denied_deletes: AtomicBool,
    next_id: AtomicUsize,
    tokens_issued: AtomicUsize,
    expire_next_call: AtomicBool,
    bucket_name_in_scope: AtomicBool,

    authorize_calls: AtomicUsize,
    upload_url_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    list_calls: AtomicUsize,
    list_bucket_calls: AtomicUsize,
    download_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

/// In-memory provider that behaves like a single B2 bucket.
///
/// Clones share state, so a test can keep a handle after moving a clone
/// into a [`Gateway`].
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object with the given content.
    pub fn with_file(self, file_name: &str, content: &[u8]) -> Self {
        self.insert(file_name, Bytes::copy_from_slice(content), "text/plain", "0".repeat(40));
        self
    }

    /// Make deletes of `file_name` fail with a provider error.
    pub fn with_failing_delete(self, file_name: &str) -> Self {
        self.state
            .failing_deletes
            .lock()
            .unwrap()
            .insert(file_name.to_string());
        self
    }

    /// Answer every delete with a 401 `unauthorized`, like a key without the
    /// `deleteFiles` capability.
    pub fn without_delete_capability(self) -> Self {
        self.state.denied_deletes.store(true, Ordering::SeqCst);
        self
    }

    /// Report the bucket name in the authorize response's `allowed` block.
    pub fn with_scoped_key(self) -> Self {
        self.state.bucket_name_in_scope.store(true, Ordering::SeqCst);
        self
    }

    /// Reject the next session-bound call with `expired_auth_token`.
    pub fn expire_session_once(&self) {
        self.state.expire_next_call.store(true, Ordering::SeqCst);
    }

    pub fn authorize_count(&self) -> usize {
        self.state.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn upload_url_count(&self) -> usize {
        self.state.upload_url_calls.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.state.upload_calls.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn list_bucket_count(&self) -> usize {
        self.state.list_bucket_calls.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.state.download_calls.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.state.delete_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn network_calls(&self) -> usize {
        self.authorize_count()
            + self.upload_url_count()
            + self.upload_count()
            + self.list_count()
            + self.list_bucket_count()
            + self.download_count()
            + self.delete_count()
    }

    pub fn file_names(&self) -> Vec<String> {
        self.state.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, file_name: &str) -> Option<MockObject> {
        self.state.objects.lock().unwrap().get(file_name).cloned()
    }

    fn insert(&self, file_name: &str, content: Bytes, content_type: &str, sha1: String) -> FileRecord {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let object = MockObject {
            file_id: format!("file-{}", id),
            content,
            content_type: content_type.to_string(),
            sha1,
        };
        let record = record_for(file_name, &object);
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(file_name.to_string(), object);
        record
    }

    fn check_session(&self, session: &Session) -> Result<(), ProviderError> {
        if session.authorization_token.is_empty() {
            return Err(ProviderError::Unauthorized {
                code: "bad_auth_token".to_string(),
                message: "missing token".to_string(),
            });
        }
        if self.state.expire_next_call.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Unauthorized {
                code: "expired_auth_token".to_string(),
                message: "Authorization token has expired".to_string(),
            });
        }
        Ok(())
    }
}

fn record_for(file_name: &str, object: &MockObject) -> FileRecord {
    FileRecord {
        file_name: file_name.to_string(),
        file_id: Some(object.file_id.clone()),
        content_length: object.content.len() as u64,
        content_sha1: Some(object.sha1.clone()),
        content_type: Some(object.content_type.clone()),
        upload_timestamp: 1_700_000_000_000,
        action: "upload".to_string(),
    }
}

fn folder_record(file_name: String) -> FileRecord {
    FileRecord {
        file_name,
        file_id: None,
        content_length: 0,
        content_sha1: None,
        content_type: None,
        upload_timestamp: 0,
        action: "folder".to_string(),
    }
}

/// Delimiter-aware listing over sorted keys, paginated like B2.
pub fn list_page(
    objects: &BTreeMap<String, MockObject>,
    request: &ListFileNames,
) -> FileListing {
    let mut entries: Vec<FileRecord> = Vec::new();
    for (name, object) in objects.range(request.prefix.clone()..) {
        let Some(rest) = name.strip_prefix(&request.prefix) else {
            break;
        };
        let folder = request
            .delimiter
            .as_deref()
            .and_then(|d| rest.find(d).map(|i| &rest[..i + d.len()]));
        match folder {
            Some(folder) => {
                let folder_name = format!("{}{}", request.prefix, folder);
                if entries.last().map(|e| e.file_name.as_str()) != Some(folder_name.as_str()) {
                    entries.push(folder_record(folder_name));
                }
            }
            None => entries.push(record_for(name, object)),
        }
    }

    let start = request.start_file_name.as_deref().unwrap_or("");
    let mut remaining = entries
        .into_iter()
        .filter(|e| e.file_name.as_str() >= start);

    let files: Vec<FileRecord> = remaining
        .by_ref()
        .take(request.max_file_count as usize)
        .collect();
    let next_file_name = remaining.next().map(|e| e.file_name);

    FileListing {
        files,
        next_file_name,
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    async fn authorize(&self) -> Result<Session, ProviderError> {
        self.state.authorize_calls.fetch_add(1, Ordering::SeqCst);
        let n = self.state.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;

        let allowed = self
            .state
            .bucket_name_in_scope
            .load(Ordering::SeqCst)
            .then(|| AllowedScope {
                bucket_id: Some(BUCKET_ID.to_string()),
                bucket_name: Some(BUCKET_NAME.to_string()),
                name_prefix: None,
                capabilities: vec!["listFiles".to_string(), "writeFiles".to_string()],
            });

        Ok(Session {
            account_id: "account-1".to_string(),
            authorization_token: format!("token-{}", n),
            api_url: "https://api.mock.invalid".to_string(),
            download_url: "https://f.mock.invalid".to_string(),
            recommended_part_size: Some(100_000_000),
            allowed,
        })
    }

    async fn get_upload_url(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<UploadTarget, ProviderError> {
        self.state.upload_url_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;

        let n = self.state.upload_url_calls.load(Ordering::SeqCst);
        Ok(UploadTarget {
            bucket_id: bucket_id.to_string(),
            upload_url: format!("https://pod.mock.invalid/upload/{}", n),
            authorization_token: format!("upload-token-{}", n),
        })
    }

    async fn upload_file(
        &self,
        _target: &UploadTarget,
        upload: UploadRequest,
    ) -> Result<FileRecord, ProviderError> {
        self.state.upload_calls.fetch_add(1, Ordering::SeqCst);

        let content_type = if upload.content_type == b2_gateway::provider::AUTO_CONTENT_TYPE {
            "text/plain"
        } else {
            upload.content_type.as_str()
        };
        Ok(self.insert(&upload.file_name, upload.content, content_type, upload.sha1))
    }

    async fn list_file_names(
        &self,
        session: &Session,
        request: &ListFileNames,
    ) -> Result<FileListing, ProviderError> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;

        let objects = self.state.objects.lock().unwrap();
        Ok(list_page(&objects, request))
    }

    async fn list_buckets(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<Vec<Bucket>, ProviderError> {
        self.state.list_bucket_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;

        if bucket_id != BUCKET_ID {
            return Ok(Vec::new());
        }
        Ok(vec![Bucket {
            bucket_id: BUCKET_ID.to_string(),
            bucket_name: BUCKET_NAME.to_string(),
        }])
    }

    async fn download_file_by_id(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<FileDownload, ProviderError> {
        self.state.download_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;

        let objects = self.state.objects.lock().unwrap();
        let (name, object) = objects
            .iter()
            .find(|(_, o)| o.file_id == file_id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                code: "not_found".to_string(),
                message: format!("File not present: {}", file_id),
            })?;

        let content = object.content.clone();
        Ok(FileDownload {
            file_name: Some(name.clone()),
            content_type: Some(object.content_type.clone()),
            content_disposition: None,
            content_length: Some(content.len() as u64),
            sha1: Some(object.sha1.clone()),
            body: Box::pin(futures::stream::iter(vec![Ok::<_, ProviderError>(content)])),
        })
    }

    async fn delete_file_version(
        &self,
        session: &Session,
        file_name: &str,
        file_id: &str,
    ) -> Result<DeletedFile, ProviderError> {
        self.state.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_session(session)?;

        if self.state.denied_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Unauthorized {
                code: "unauthorized".to_string(),
                message: "not entitled".to_string(),
            });
        }
        if self.state.failing_deletes.lock().unwrap().contains(file_name) {
            return Err(ProviderError::Api {
                status: 500,
                code: "internal_error".to_string(),
                message: "delete failed".to_string(),
            });
        }

        let mut objects = self.state.objects.lock().unwrap();
        match objects.get(file_name) {
            Some(object) if object.file_id == file_id => {
                objects.remove(file_name);
                Ok(DeletedFile {
                    file_id: file_id.to_string(),
                    file_name: file_name.to_string(),
                })
            }
            _ => Err(ProviderError::Api {
                status: 400,
                code: "file_not_present".to_string(),
                message: format!("File not present: {} {}", file_name, file_id),
            }),
        }
    }
}

// =============================================================================
// Gateway / Router Helpers
// =============================================================================

pub fn test_settings() -> GatewaySettings {
    GatewaySettings::new(BUCKET_ID)
}

pub fn test_gateway(provider: MockProvider) -> Gateway<MockProvider> {
    Gateway::new(provider, test_settings())
}

pub fn test_router(provider: MockProvider) -> Router {
    create_router(
        test_gateway(provider),
        RouterConfig::default().with_tracing(false),
    )
}

pub fn test_router_with(provider: MockProvider, settings: GatewaySettings) -> Router {
    create_router(
        Gateway::new(provider, settings),
        RouterConfig::default().with_tracing(false),
    )
}

// =============================================================================
// Mock B2 HTTP Server
// =============================================================================

pub const MOCK_KEY_ID: &str = "mock-key-id";
pub const MOCK_APP_KEY: &str = "mock-app-key";

/// File id the mock server streams slowly, in `SLOW_CHUNKS` chunks of
/// `SLOW_CHUNK_SIZE` bytes with `SLOW_CHUNK_DELAY` before each chunk.
pub const SLOW_FILE_ID: &str = "4_zslow";
pub const SLOW_CHUNK_SIZE: usize = 1024;
pub const SLOW_CHUNKS: usize = 4;
pub const SLOW_CHUNK_DELAY: Duration = Duration::from_millis(400);

/// Shared state of the mock B2 server.
#[derive(Default)]
pub struct MockB2State {
    pub base_url: Mutex<String>,
    pub objects: Mutex<BTreeMap<String, MockObject>>,
    pub next_id: AtomicUsize,
    pub tokens_issued: AtomicUsize,
    pub authorize_calls: AtomicUsize,
    pub expire_next_call: AtomicBool,
    /// `(file name header, content type, sha1 header)` of each upload
    pub uploads: Mutex<Vec<(String, String, String)>>,
}

impl MockB2State {
    fn current_token(&self) -> String {
        format!("b2-token-{}", self.tokens_issued.load(Ordering::SeqCst))
    }
}

/// Handle to a running mock B2 server.
pub struct MockB2Server {
    pub url: String,
    pub state: Arc<MockB2State>,
}

impl MockB2Server {
    pub fn authorize_count(&self) -> usize {
        self.state.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn expire_session_once(&self) {
        self.state.expire_next_call.store(true, Ordering::SeqCst);
    }
}

/// Start a mock B2 server on an ephemeral local port.
pub async fn spawn_mock_b2() -> MockB2Server {
    let state = Arc::new(MockB2State::default());

    let router = Router::new()
        .route("/b2api/v2/b2_authorize_account", get(mock_authorize))
        .route("/b2api/v2/b2_get_upload_url", post(mock_get_upload_url))
        .route("/b2api/v2/b2_list_file_names", post(mock_list_file_names))
        .route("/b2api/v2/b2_list_buckets", post(mock_list_buckets))
        .route("/b2api/v2/b2_delete_file_version", post(mock_delete_file_version))
        .route("/b2api/v2/b2_download_file_by_id", get(mock_download_file_by_id))
        .route("/upload", post(mock_upload))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    *state.base_url.lock().unwrap() = url.clone();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockB2Server { url, state }
}

fn b2_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "status": status.as_u16(), "code": code, "message": message })),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Check the `Authorization` header against the latest issued token.
fn check_token(state: &MockB2State, headers: &HeaderMap) -> Result<(), Response> {
    if state.expire_next_call.swap(false, Ordering::SeqCst) {
        return Err(b2_error(
            StatusCode::UNAUTHORIZED,
            "expired_auth_token",
            "Authorization token has expired",
        ));
    }
    if header_str(headers, "authorization") != state.current_token() {
        return Err(b2_error(
            StatusCode::UNAUTHORIZED,
            "bad_auth_token",
            "Invalid authorization token",
        ));
    }
    Ok(())
}

async fn mock_authorize(State(state): State<Arc<MockB2State>>, headers: HeaderMap) -> Response {
    use base64::Engine;

    state.authorize_calls.fetch_add(1, Ordering::SeqCst);

    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", MOCK_KEY_ID, MOCK_APP_KEY))
    );
    if header_str(&headers, "authorization") != expected {
        return b2_error(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid key");
    }

    state.tokens_issued.fetch_add(1, Ordering::SeqCst);
    let base = state.base_url.lock().unwrap().clone();
    Json(json!({
        "accountId": "account-1",
        "authorizationToken": state.current_token(),
        "apiUrl": base,
        "downloadUrl": base,
        "recommendedPartSize": 100000000,
        "absoluteMinimumPartSize": 5000000,
        "allowed": {
            "bucketId": BUCKET_ID,
            "bucketName": BUCKET_NAME,
            "capabilities": ["listFiles", "readFiles", "writeFiles", "deleteFiles"],
            "namePrefix": null
        }
    }))
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketIdBody {
    bucket_id: String,
}

async fn mock_get_upload_url(
    State(state): State<Arc<MockB2State>>,
    headers: HeaderMap,
    Json(body): Json<BucketIdBody>,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }
    let base = state.base_url.lock().unwrap().clone();
    Json(json!({
        "bucketId": body.bucket_id,
        "uploadUrl": format!("{}/upload", base),
        "authorizationToken": "upload-token",
    }))
    .into_response()
}

async fn mock_upload(
    State(state): State<Arc<MockB2State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if header_str(&headers, "authorization") != "upload-token" {
        return b2_error(StatusCode::UNAUTHORIZED, "bad_auth_token", "Invalid upload token");
    }

    let raw_name = header_str(&headers, "x-bz-file-name").to_string();
    let content_type = header_str(&headers, "content-type").to_string();
    let sha1 = header_str(&headers, "x-bz-content-sha1").to_string();
    let declared_length: usize = header_str(&headers, "content-length").parse().unwrap_or(0);
    if declared_length != body.len() {
        return b2_error(StatusCode::BAD_REQUEST, "bad_request", "Content-Length mismatch");
    }

    state
        .uploads
        .lock()
        .unwrap()
        .push((raw_name.clone(), content_type, sha1.clone()));

    let file_name = urlencoding::decode(&raw_name).unwrap().into_owned();
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let object = MockObject {
        file_id: format!("4_z{}", id),
        content: body,
        content_type: "text/plain".to_string(),
        sha1,
    };
    let record = record_for(&file_name, &object);
    state.objects.lock().unwrap().insert(file_name, object);

    Json(record).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBody {
    bucket_id: String,
    prefix: String,
    #[serde(default)]
    delimiter: Option<String>,
    #[serde(default)]
    start_file_name: Option<String>,
    max_file_count: u32,
}

async fn mock_list_file_names(
    State(state): State<Arc<MockB2State>>,
    headers: HeaderMap,
    Json(body): Json<ListBody>,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }
    if body.bucket_id != BUCKET_ID {
        return b2_error(StatusCode::BAD_REQUEST, "bad_bucket_id", "Invalid bucketId");
    }

    let request = ListFileNames {
        bucket_id: body.bucket_id,
        prefix: body.prefix,
        delimiter: body.delimiter,
        start_file_name: body.start_file_name,
        max_file_count: body.max_file_count,
    };
    let objects = state.objects.lock().unwrap();
    Json(list_page(&objects, &request)).into_response()
}

async fn mock_list_buckets(State(state): State<Arc<MockB2State>>, headers: HeaderMap) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }
    Json(json!({
        "buckets": [{ "bucketId": BUCKET_ID, "bucketName": BUCKET_NAME, "bucketType": "allPrivate" }]
    }))
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadQuery {
    file_id: String,
}

async fn mock_download_file_by_id(
    State(state): State<Arc<MockB2State>>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }
    if query.file_id == SLOW_FILE_ID {
        return slow_download();
    }

    let objects = state.objects.lock().unwrap();
    let Some((name, object)) = objects.iter().find(|(_, o)| o.file_id == query.file_id) else {
        return b2_error(StatusCode::NOT_FOUND, "not_found", "File not present");
    };

    (
        [
            ("content-type", object.content_type.clone()),
            ("x-bz-file-name", b2_gateway::provider::encode_file_name(name)),
            ("x-bz-content-sha1", object.sha1.clone()),
        ],
        object.content.clone(),
    )
        .into_response()
}

/// A download whose body trickles in well past any total request deadline.
fn slow_download() -> Response {
    let chunks = futures::stream::unfold(0usize, |sent| async move {
        if sent == SLOW_CHUNKS {
            return None;
        }
        tokio::time::sleep(SLOW_CHUNK_DELAY).await;
        let chunk = Bytes::from(vec![b'x'; SLOW_CHUNK_SIZE]);
        Some((Ok::<_, std::io::Error>(chunk), sent + 1))
    });

    (
        [
            ("content-type", "application/octet-stream".to_string()),
            ("content-length", (SLOW_CHUNK_SIZE * SLOW_CHUNKS).to_string()),
            ("x-bz-file-name", "user/slow.bin".to_string()),
        ],
        axum::body::Body::from_stream(chunks),
    )
        .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    file_name: String,
    file_id: String,
}

async fn mock_delete_file_version(
    State(state): State<Arc<MockB2State>>,
    headers: HeaderMap,
    Json(body): Json<DeleteBody>,
) -> Response {
    if let Err(response) = check_token(&state, &headers) {
        return response;
    }

    let mut objects = state.objects.lock().unwrap();
    match objects.get(&body.file_name) {
        Some(object) if object.file_id == body.file_id => {
            objects.remove(&body.file_name);
            Json(json!({ "fileId": body.file_id, "fileName": body.file_name })).into_response()
        }
        _ => b2_error(StatusCode::BAD_REQUEST, "file_not_present", "File not present"),
    }
}
