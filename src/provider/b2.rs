//! Backblaze B2 native API client.
//!
//! Implements [`StorageProvider`] on top of `reqwest`. All API calls other than
//! authorize and download are JSON `POST`s against the session's `apiUrl`.
//!
//! # Example
//!
//! ```ignore
//! use b2_gateway::provider::{B2Client, B2Credentials, StorageProvider, DEFAULT_AUTH_URL};
//!
//! let credentials = B2Credentials::new("key-id", "application-key");
//! let client = B2Client::new(credentials, DEFAULT_AUTH_URL, Duration::from_secs(60))?;
//! let session = client.authorize().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;

use super::{
    Bucket, DeletedFile, FileDownload, FileListing, FileRecord, ListFileNames, Session,
    StorageProvider, UploadRequest, UploadTarget,
};

/// Default endpoint of the authorize call.
pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com";

/// Content type that asks the provider to detect the type from the file name.
pub const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

const API_PATH: &str = "/b2api/v2";

const FILE_NAME_HEADER: &str = "X-Bz-File-Name";
const CONTENT_SHA1_HEADER: &str = "X-Bz-Content-Sha1";

// =============================================================================
// Credentials
// =============================================================================

/// Application key pair used for the authorize call.
#[derive(Clone, Default)]
pub struct B2Credentials {
    key_id: String,
    application_key: String,
}

impl B2Credentials {
    pub fn new(key_id: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            application_key: application_key.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.key_id.is_empty() {
            return Err(ProviderError::MissingCredentials("B2_KEY_ID"));
        }
        if self.application_key.is_empty() {
            return Err(ProviderError::MissingCredentials("B2_APP_KEY"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for B2Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketIdBody<'a> {
    bucket_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsBody<'a> {
    account_id: &'a str,
    bucket_id: &'a str,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<Bucket>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteFileBody<'a> {
    file_name: &'a str,
    file_id: &'a str,
}

// =============================================================================
// B2Client
// =============================================================================

/// `reqwest`-based [`StorageProvider`] for the B2 native API.
#[derive(Clone)]
pub struct B2Client {
    http: Client,
    auth_url: String,
    credentials: B2Credentials,
    api_timeout: Duration,
}

impl B2Client {
    /// Create a client.
    ///
    /// # Arguments
    /// * `credentials` - application key pair
    /// * `auth_url` - base URL of the authorize endpoint (normally [`DEFAULT_AUTH_URL`])
    /// * `timeout` - connect and idle-read timeout of every provider call, and
    ///   the total deadline of the JSON API calls. Uploads and downloads have
    ///   no total deadline so large bodies are not cut off mid-transfer.
    pub fn new(
        credentials: B2Credentials,
        auth_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("b2-gateway/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Connection(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            credentials,
            api_timeout: timeout,
        })
    }

    /// Base URL of the authorize endpoint.
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    /// POST a JSON body to a native API operation and decode the JSON reply.
    async fn call_api<B, T>(&self, session: &Session, operation: &str, body: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!(
            "{}{}/{}",
            session.api_url.trim_end_matches('/'),
            API_PATH,
            operation
        );
        debug!(operation = operation, "Calling provider API");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, &session.authorization_token)
            .timeout(self.api_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("{} failed: {}", operation, e)))?;

        parse_json(response).await
    }
}

#[async_trait]
impl StorageProvider for B2Client {
    async fn authorize(&self) -> Result<Session, ProviderError> {
        self.credentials.check()?;

        let url = format!("{}{}/b2_authorize_account", self.auth_url, API_PATH);
        debug!(key_id = self.credentials.key_id(), "Authorizing account");

        let response = self
            .http
            .get(&url)
            .basic_auth(
                &self.credentials.key_id,
                Some(&self.credentials.application_key),
            )
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("b2_authorize_account failed: {}", e)))?;

        parse_json(response).await
    }

    async fn get_upload_url(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<UploadTarget, ProviderError> {
        self.call_api(session, "b2_get_upload_url", &BucketIdBody { bucket_id })
            .await
    }

    async fn upload_file(
        &self,
        target: &UploadTarget,
        upload: UploadRequest,
    ) -> Result<FileRecord, ProviderError> {
        debug!(
            file_name = %upload.file_name,
            size = upload.content.len(),
            "Uploading file"
        );

        // Content-Length is derived from the body
        let response = self
            .http
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header(FILE_NAME_HEADER, encode_file_name(&upload.file_name))
            .header(CONTENT_TYPE, &upload.content_type)
            .header(CONTENT_SHA1_HEADER, &upload.sha1)
            .body(upload.content)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("upload failed: {}", e)))?;

        parse_json(response).await
    }

    async fn list_file_names(
        &self,
        session: &Session,
        request: &ListFileNames,
    ) -> Result<FileListing, ProviderError> {
        self.call_api(session, "b2_list_file_names", request).await
    }

    async fn list_buckets(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<Vec<Bucket>, ProviderError> {
        let body = ListBucketsBody {
            account_id: &session.account_id,
            bucket_id,
        };
        let response: ListBucketsResponse =
            self.call_api(session, "b2_list_buckets", &body).await?;
        Ok(response.buckets)
    }

    async fn download_file_by_id(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<FileDownload, ProviderError> {
        let url = format!(
            "{}{}/b2_download_file_by_id",
            session.download_url.trim_end_matches('/'),
            API_PATH
        );
        debug!(file_id = file_id, "Downloading file");

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, &session.authorization_token)
            .query(&[("fileId", file_id)])
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let file_name = header(FILE_NAME_HEADER).map(|name| {
            urlencoding::decode(&name)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(name)
        });
        let content_type = header(CONTENT_TYPE.as_str());
        let content_disposition = header(CONTENT_DISPOSITION.as_str());
        let sha1 = header(CONTENT_SHA1_HEADER);
        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_err(|e| ProviderError::Connection(format!("download interrupted: {}", e)));

        Ok(FileDownload {
            file_name,
            content_type,
            content_disposition,
            content_length,
            sha1,
            body: Box::pin(body),
        })
    }

    async fn delete_file_version(
        &self,
        session: &Session,
        file_name: &str,
        file_id: &str,
    ) -> Result<DeletedFile, ProviderError> {
        self.call_api(
            session,
            "b2_delete_file_version",
            &DeleteFileBody { file_name, file_id },
        )
        .await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Percent-encode a file name for the `X-Bz-File-Name` header.
///
/// Each path segment is encoded separately so `/` separators stay literal.
pub fn encode_file_name(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    parse_error_body(status, &body)
}

/// Build a [`ProviderError`] from a failed response's status and body.
fn parse_error_body(status: u16, body: &str) -> ProviderError {
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) if !err.code.is_empty() => (err.code, err.message),
        _ => ("unknown".to_string(), body.trim().to_string()),
    };

    if status == 401 {
        ProviderError::Unauthorized { code, message }
    } else {
        ProviderError::Api {
            status,
            code,
            message,
        }
    }
}
