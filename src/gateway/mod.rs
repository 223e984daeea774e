//! Gateway operations.
//!
//! [`Gateway`] implements the client-facing operations (list folders, list
//! files, download, upload, delete) on top of any [`StorageProvider`]. It owns
//! the session cache and handles the authorize-then-act sequence: every
//! provider call runs under the cached session, and a session the provider
//! rejects is dropped and replaced once before the error is surfaced.
//!
//! # Example
//!
//! ```ignore
//! use b2_gateway::gateway::{Gateway, GatewaySettings};
//!
//! let gateway = Gateway::new(client, GatewaySettings::new("bucket-id"));
//! let folders = gateway.list_folders().await?;
//! ```

pub mod paths;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{FailedDelete, GatewayError, ProviderError};
use crate::provider::{
    DeletedFile, FileDownload, FileRecord, ListFileNames, Session, SessionCache, StorageProvider,
    UploadRequest, UploadTarget, AUTO_CONTENT_TYPE, DEFAULT_SESSION_TTL,
};

pub use paths::{
    base_name, clean_folder, folder_names, folder_prefix, is_direct_child, object_key,
    MAX_FILE_NAME_BYTES,
};

// =============================================================================
// Configuration
// =============================================================================

/// Default root prefix under which all gateway objects live.
pub const DEFAULT_ROOT_PREFIX: &str = "user/";

/// Default page size of file-name listings (the provider's free-tier maximum).
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 1000;

/// Largest page size the provider accepts.
pub const MAX_LIST_PAGE_SIZE: u32 = 10_000;

/// Settings that distinguish one gateway deployment from another.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Bucket all operations run against
    pub bucket_id: String,

    /// Bucket name reported by file listings; looked up when not set
    pub bucket_name: Option<String>,

    /// Key prefix all paths live under (must end with `/`)
    pub root_prefix: String,

    /// Whether the `folder` parameter scopes listings and uploads
    pub folder_scoping: bool,

    /// Page size of file-name listings
    pub list_page_size: u32,

    /// Validity window of the cached session
    pub session_ttl: Duration,
}

impl GatewaySettings {
    /// Settings for a bucket with every other option at its default.
    pub fn new(bucket_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            bucket_name: None,
            root_prefix: DEFAULT_ROOT_PREFIX.to_string(),
            folder_scoping: true,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_bucket_name(mut self, name: impl Into<String>) -> Self {
        self.bucket_name = Some(name.into());
        self
    }

    pub fn with_root_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.root_prefix = prefix.into();
        self
    }

    pub fn with_folder_scoping(mut self, enabled: bool) -> Self {
        self.folder_scoping = enabled;
        self
    }

    pub fn with_list_page_size(mut self, size: u32) -> Self {
        self.list_page_size = size.clamp(1, MAX_LIST_PAGE_SIZE);
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

// =============================================================================
// Client-facing Views
// =============================================================================

/// Read-only projection of a provider file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_name: String,
    pub file_id: String,
    pub size: u64,
    pub upload_timestamp: i64,
    pub sha1: Option<String>,
    pub content_type: Option<String>,
}

impl From<FileRecord> for StoredFile {
    fn from(record: FileRecord) -> Self {
        Self {
            file_name: record.file_name,
            file_id: record.file_id.unwrap_or_default(),
            size: record.content_length,
            upload_timestamp: record.upload_timestamp,
            sha1: record.content_sha1,
            content_type: record.content_type,
        }
    }
}

/// Result of a file listing.
#[derive(Debug, Clone)]
pub struct FileList {
    pub files: Vec<StoredFile>,
    pub bucket_name: String,
}

/// Client upload input, before validation.
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub file_name: Option<String>,

    /// Base64-encoded content
    pub file_data: Option<String>,

    /// Hex SHA-1 of the decoded content
    pub sha1: Option<String>,

    pub folder: Option<String>,
}

/// Upload input that passed validation.
#[derive(Debug)]
struct ValidatedUpload {
    key: String,
    sha1: String,
    content: Bytes,
}

impl NewFile {
    fn validate(self, root: &str, folder_scoping: bool) -> Result<ValidatedUpload, GatewayError> {
        let missing: Vec<&str> = [
            ("fileName", &self.file_name),
            ("fileData", &self.file_data),
            ("sha1", &self.sha1),
        ]
        .iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(field, _)| *field)
        .collect();

        if !missing.is_empty() {
            return Err(GatewayError::Validation(format!(
                "Missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let file_name = self.file_name.unwrap_or_default();
        let file_data = self.file_data.unwrap_or_default();
        let sha1 = self.sha1.unwrap_or_default().trim().to_ascii_lowercase();

        if sha1.len() != 40 || hex::decode(&sha1).is_err() {
            return Err(GatewayError::Validation(
                "sha1 must be a 40 character hex digest".to_string(),
            ));
        }

        let content = BASE64
            .decode(file_data.trim())
            .map_err(|e| GatewayError::Validation(format!("fileData is not valid base64: {}", e)))?;

        let folder = self
            .folder
            .as_deref()
            .filter(|f| folder_scoping && !f.trim().is_empty());
        let key = object_key(root, folder, &file_name)?;

        Ok(ValidatedUpload {
            key,
            sha1,
            content: Bytes::from(content),
        })
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Authorize-then-act front for a [`StorageProvider`].
pub struct Gateway<P: StorageProvider> {
    provider: P,
    sessions: SessionCache,
    settings: GatewaySettings,
}

impl<P: StorageProvider> Gateway<P> {
    /// Create a gateway over `provider`.
    pub fn new(provider: P, settings: GatewaySettings) -> Self {
        Self {
            provider,
            sessions: SessionCache::new(settings.session_ttl),
            settings,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Return the cached session, authorizing if needed.
    pub async fn authorize(&self) -> Result<Arc<Session>, GatewayError> {
        self.sessions
            .get(&self.provider)
            .await
            .map_err(GatewayError::from_authorize)
    }

    /// Folder names directly under the root prefix, sorted.
    pub async fn list_folders(&self) -> Result<Vec<String>, GatewayError> {
        let root = &self.settings.root_prefix;
        let records = self.list_all(root, Some("/")).await?;
        let folders = folder_names(records.iter().map(|r| r.file_name.as_str()), root);

        debug!(count = folders.len(), "Listed folders");
        Ok(folders)
    }

    /// Files directly inside the root prefix or one of its folders.
    pub async fn list_files(&self, folder: Option<&str>) -> Result<FileList, GatewayError> {
        let root = &self.settings.root_prefix;
        let prefix = match folder.filter(|f| self.settings.folder_scoping && !f.trim().is_empty()) {
            Some(folder) => folder_prefix(root, folder)?,
            None => root.clone(),
        };

        let records = self.list_all(&prefix, Some("/")).await?;
        let files: Vec<StoredFile> = records
            .into_iter()
            .filter(|r| !r.is_folder() && is_direct_child(&r.file_name, &prefix))
            .map(StoredFile::from)
            .collect();

        let bucket_name = self.bucket_name().await?;

        debug!(prefix = %prefix, count = files.len(), "Listed files");
        Ok(FileList { files, bucket_name })
    }

    /// Stream a file's content by id.
    pub async fn download(&self, file_id: &str) -> Result<FileDownload, GatewayError> {
        let file_id = file_id.trim();
        if file_id.is_empty() {
            return Err(GatewayError::Validation("fileId must not be empty".to_string()));
        }

        let provider = &self.provider;
        let download = self
            .with_session(|session| async move {
                provider.download_file_by_id(&session, file_id).await
            })
            .await?;

        Ok(download)
    }

    /// Delete one file version.
    pub async fn delete_file(
        &self,
        file_id: &str,
        file_name: &str,
    ) -> Result<DeletedFile, GatewayError> {
        let (file_id, file_name) = (file_id.trim(), file_name.trim());
        if file_id.is_empty() || file_name.is_empty() {
            return Err(GatewayError::Validation(
                "fileId and fileName must not be empty".to_string(),
            ));
        }

        let deleted = self.delete_one(file_name, file_id).await?;
        info!(file_name = %deleted.file_name, "Deleted file");
        Ok(deleted)
    }

    /// Delete every object under a folder, concurrently.
    ///
    /// All deletes run to completion. When some fail, the error reports how
    /// many went through and which files are left.
    pub async fn delete_folder(&self, folder: &str) -> Result<usize, GatewayError> {
        if !self.settings.folder_scoping {
            return Err(GatewayError::Validation(
                "Folder operations are disabled on this gateway".to_string(),
            ));
        }

        let prefix = folder_prefix(&self.settings.root_prefix, folder)?;
        let targets: Vec<(String, String)> = self
            .list_all(&prefix, None)
            .await?
            .into_iter()
            .filter_map(|r| r.file_id.map(|id| (r.file_name, id)))
            .collect();

        if targets.is_empty() {
            return Err(GatewayError::NotFound(format!(
                "No files found in folder '{}'",
                folder.trim_matches('/')
            )));
        }

        let outcomes = join_all(
            targets
                .iter()
                .map(|(name, id)| self.delete_one(name, id)),
        )
        .await;

        let mut deleted = 0;
        let mut failed = Vec::new();
        for ((name, _), outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(_) => deleted += 1,
                Err(e) => {
                    warn!(file_name = %name, error = %e, "Failed to delete file");
                    failed.push(FailedDelete {
                        file_name: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(GatewayError::PartialDelete { deleted, failed });
        }

        info!(prefix = %prefix, count = deleted, "Deleted folder");
        Ok(deleted)
    }

    /// Validate, decode and store a client file in one request.
    pub async fn upload(&self, file: NewFile) -> Result<StoredFile, GatewayError> {
        let upload = file.validate(&self.settings.root_prefix, self.settings.folder_scoping)?;

        let target = self.upload_target().await?;
        let size = upload.content.len();
        let record = self
            .provider
            .upload_file(
                &target,
                UploadRequest {
                    file_name: upload.key,
                    content_type: AUTO_CONTENT_TYPE.to_string(),
                    sha1: upload.sha1,
                    content: upload.content,
                },
            )
            .await?;

        info!(file_name = %record.file_name, size = size, "Uploaded file");
        Ok(StoredFile::from(record))
    }

    /// Allocate a fresh upload URL and token. Never cached.
    pub async fn upload_target(&self) -> Result<UploadTarget, GatewayError> {
        let bucket_id = self.bucket_id()?;
        let provider = &self.provider;
        let target = self
            .with_session(|session| async move {
                provider.get_upload_url(&session, bucket_id).await
            })
            .await?;
        Ok(target)
    }

    /// Name of the configured bucket.
    ///
    /// Taken from the settings, then from the key's bucket restriction, then
    /// from a bucket listing.
    pub async fn bucket_name(&self) -> Result<String, GatewayError> {
        if let Some(name) = &self.settings.bucket_name {
            return Ok(name.clone());
        }

        let bucket_id = self.bucket_id()?;
        let session = self.authorize().await?;
        if let Some(name) = session
            .allowed
            .as_ref()
            .filter(|a| a.bucket_id.as_deref() == Some(bucket_id))
            .and_then(|a| a.bucket_name.clone())
        {
            return Ok(name);
        }

        let provider = &self.provider;
        let buckets = self
            .with_session(|session| async move { provider.list_buckets(&session, bucket_id).await })
            .await?;

        buckets
            .into_iter()
            .find(|b| b.bucket_id == bucket_id)
            .map(|b| b.bucket_name)
            .ok_or_else(|| {
                GatewayError::Config(format!(
                    "bucket {} is not visible to the configured key",
                    bucket_id
                ))
            })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn bucket_id(&self) -> Result<&str, GatewayError> {
        if self.settings.bucket_id.is_empty() {
            return Err(GatewayError::Config("B2_BUCKET_ID is not set".to_string()));
        }
        Ok(&self.settings.bucket_id)
    }

    async fn delete_one(&self, file_name: &str, file_id: &str) -> Result<DeletedFile, GatewayError> {
        let provider = &self.provider;
        self.with_session(|session| async move {
            provider
                .delete_file_version(&session, file_name, file_id)
                .await
        })
        .await
    }

    /// Every record under `prefix`, following pagination.
    async fn list_all(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<FileRecord>, GatewayError> {
        let mut request = ListFileNames {
            bucket_id: self.bucket_id()?.to_string(),
            prefix: prefix.to_string(),
            delimiter: delimiter.map(str::to_string),
            start_file_name: None,
            max_file_count: self.settings.list_page_size,
        };

        let provider = &self.provider;
        let mut records = Vec::new();
        loop {
            let page_request = &request;
            let page = self
                .with_session(|session| async move {
                    provider.list_file_names(&session, page_request).await
                })
                .await?;

            records.extend(page.files);

            match page.next_file_name {
                Some(next) => request.start_file_name = Some(next),
                None => break,
            }
        }

        Ok(records)
    }

    /// Run `op` under the cached session, replacing the session once if the
    /// provider rejects its token.
    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let session = self.authorize().await?;

        match op(Arc::clone(&session)).await {
            Err(err) if err.is_session_rejected() => {
                warn!(error = %err, "Session token rejected, re-authorizing");
                self.sessions.invalidate(&session).await;
                let session = self.authorize().await?;
                Ok(op(session).await?)
            }
            other => Ok(other?),
        }
    }
}
