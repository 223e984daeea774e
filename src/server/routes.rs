//! Router configuration for the gateway.
//!
//! # Route Structure
//!
//! ```text
//! /health               - Health check
//! /api/files            - List, download, upload and delete (GET/POST/DELETE/OPTIONS)
//! /api/get-upload-url   - Upload URL for clients that upload directly
//! ```
//!
//! # Example
//!
//! ```ignore
//! use b2_gateway::server::routes::{create_router, RouterConfig};
//!
//! let router = create_router(gateway, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};
use http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    files_delete_handler, files_get_handler, files_post_handler, health_handler,
    method_not_allowed_handler, options_handler, upload_url_handler, AppState,
    CONTENT_SHA1_HEADER,
};
use crate::gateway::Gateway;
use crate::provider::StorageProvider;

/// Path of the file operations endpoint.
pub const FILES_PATH: &str = "/api/files";

/// Path of the upload URL endpoint.
pub const UPLOAD_URL_PATH: &str = "/api/get-upload-url";

/// Default request body limit (64 MiB). Uploads arrive base64-encoded.
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Largest accepted request body in bytes
    pub max_body_size: usize,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the request body limit in bytes.
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// Unsupported verbs on either API route answer 405 with the JSON error
/// envelope. Every response carries the CORS headers.
pub fn create_router<P>(gateway: Gateway<P>, config: RouterConfig) -> Router
where
    P: StorageProvider + 'static,
{
    let state = AppState::new(gateway);
    let cors = build_cors_layer(&config);

    let files_route = get(files_get_handler::<P>)
        .post(files_post_handler::<P>)
        .delete(files_delete_handler::<P>)
        .options(options_handler)
        .fallback(method_not_allowed_handler);

    let upload_url_route = get(upload_url_handler::<P>)
        .post(upload_url_handler::<P>)
        .options(options_handler)
        .fallback(method_not_allowed_handler);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(FILES_PATH, files_route)
        .route(UPLOAD_URL_PATH, upload_url_route)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([
            CONTENT_DISPOSITION,
            CONTENT_LENGTH,
            HeaderName::from_static(CONTENT_SHA1_HEADER),
        ])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}
