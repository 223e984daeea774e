//! # B2 Gateway
//!
//! An HTTP gateway that lets a browser client list, upload, download and
//! delete files in a Backblaze B2 bucket without ever seeing the account
//! credentials.
//!
//! Each request runs the same straight-line sequence: obtain a provider
//! session (cached process-wide for a bounded time), make at most a couple of
//! provider calls, and reshape the result into a small JSON contract.
//!
//! ## Architecture
//!
//! - [`provider`] - Provider trait, B2 native API client and session cache
//! - [`gateway`] - Client-facing operations and key/path handling
//! - [`server`] - Axum handlers, method routing and CORS
//! - [`config`] - CLI and environment configuration
//! - [`error`] - Error taxonomy shared by all layers
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use b2_gateway::{create_router, B2Client, B2Credentials, Gateway, GatewaySettings, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = B2Client::new(
//!         B2Credentials::new("key-id", "application-key"),
//!         b2_gateway::provider::DEFAULT_AUTH_URL,
//!         Duration::from_secs(60),
//!     )?;
//!     let gateway = Gateway::new(client, GatewaySettings::new("bucket-id"));
//!     let router = create_router(gateway, RouterConfig::default());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod server;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, ProviderConfig, ServeConfig};
pub use error::{FailedDelete, GatewayError, ProviderError};
pub use gateway::{FileList, Gateway, GatewaySettings, NewFile, StoredFile};
pub use provider::{
    B2Client, B2Credentials, Bucket, DeletedFile, FileDownload, FileListing, FileRecord,
    ListFileNames, Session, SessionCache, StorageProvider, UploadRequest, UploadTarget,
};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
