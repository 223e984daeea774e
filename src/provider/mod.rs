//! Storage provider abstraction.
//!
//! The gateway never talks HTTP to the provider directly. It goes through the
//! [`StorageProvider`] trait, which mirrors the handful of B2 native API calls
//! the gateway needs. [`B2Client`] is the production implementation; tests
//! substitute an in-memory provider.
//!
//! # Components
//!
//! - [`B2Client`] - `reqwest`-based client for the B2 native API (v2)
//! - [`SessionCache`] - time-bounded memoization of the authorize call

pub mod b2;
pub mod session;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use b2::{encode_file_name, B2Client, B2Credentials, AUTO_CONTENT_TYPE, DEFAULT_AUTH_URL};
pub use session::{SessionCache, DEFAULT_SESSION_TTL};

// =============================================================================
// Provider Records
// =============================================================================

/// Authorization context returned by the provider's authorize call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,

    #[serde(default)]
    pub recommended_part_size: Option<u64>,

    /// Bucket restriction of the application key, if any
    #[serde(default)]
    pub allowed: Option<AllowedScope>,
}

/// Restrictions attached to an application key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedScope {
    #[serde(default)]
    pub bucket_id: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Single-use upload endpoint for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    #[serde(default)]
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// A file record as returned by listing, upload and delete calls.
///
/// Folder placeholders produced by delimiter listings have `action == "folder"`
/// and no file id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_name: String,

    #[serde(default)]
    pub file_id: Option<String>,

    #[serde(default)]
    pub content_length: u64,

    #[serde(default)]
    pub content_sha1: Option<String>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub upload_timestamp: i64,

    #[serde(default)]
    pub action: String,
}

impl FileRecord {
    /// Whether this record is a virtual folder rather than a stored object.
    pub fn is_folder(&self) -> bool {
        self.action == "folder" || self.file_id.is_none()
    }
}

/// One page of a file-name listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub files: Vec<FileRecord>,

    /// First name of the next page, if the listing was truncated
    #[serde(default)]
    pub next_file_name: Option<String>,
}

/// Parameters of a file-name listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileNames {
    pub bucket_id: String,
    pub prefix: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_name: Option<String>,

    pub max_file_count: u32,
}

/// Bucket summary from the bucket listing call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_id: String,
    pub bucket_name: String,
}

/// Identity of a deleted file version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFile {
    pub file_id: String,
    pub file_name: String,
}

/// Content to store with a single-shot upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Full destination path (unencoded)
    pub file_name: String,
    pub content_type: String,
    pub sha1: String,
    pub content: Bytes,
}

/// Streaming body of a downloaded file.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// A downloaded file: the provider's headers plus the body stream.
pub struct FileDownload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
    pub sha1: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDownload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// StorageProvider Trait
// =============================================================================

/// Operations of the provider's REST API consumed by the gateway.
///
/// Every call except [`authorize`](StorageProvider::authorize) and
/// [`upload_file`](StorageProvider::upload_file) takes the session it should
/// run under; session reuse is the caller's business (see [`SessionCache`]).
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Exchange the configured key pair for a session.
    async fn authorize(&self) -> Result<Session, ProviderError>;

    /// Allocate a fresh upload URL and token for a bucket.
    async fn get_upload_url(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<UploadTarget, ProviderError>;

    /// Upload a whole file in one request.
    async fn upload_file(
        &self,
        target: &UploadTarget,
        upload: UploadRequest,
    ) -> Result<FileRecord, ProviderError>;

    /// List one page of file names.
    async fn list_file_names(
        &self,
        session: &Session,
        request: &ListFileNames,
    ) -> Result<FileListing, ProviderError>;

    /// List the buckets visible to the session, narrowed to `bucket_id`.
    async fn list_buckets(
        &self,
        session: &Session,
        bucket_id: &str,
    ) -> Result<Vec<Bucket>, ProviderError>;

    /// Fetch a file's content by id.
    async fn download_file_by_id(
        &self,
        session: &Session,
        file_id: &str,
    ) -> Result<FileDownload, ProviderError>;

    /// Delete one version of a file.
    async fn delete_file_version(
        &self,
        session: &Session,
        file_name: &str,
        file_id: &str,
    ) -> Result<DeletedFile, ProviderError>;
}
