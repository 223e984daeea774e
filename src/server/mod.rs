//! HTTP server layer for the gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET | POST | DELETE | OPTIONS  /api/files                │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (dispatch, JSON shapes)  │  │  (method routing, CORS)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                        gateway::Gateway
//!                               │
//!                     provider::StorageProvider
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    files_delete_handler, files_get_handler, files_post_handler, health_handler,
    method_not_allowed_handler, options_handler, upload_url_handler, AppState, DeleteBody,
    DeleteResponse, DeleteTarget, ErrorResponse, FilesQueryParams, FilesResponse, FoldersResponse,
    HealthResponse, UploadBody, UploadResponse, UploadUrlResponse, CONTENT_SHA1_HEADER,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_BODY_SIZE, FILES_PATH, UPLOAD_URL_PATH};
