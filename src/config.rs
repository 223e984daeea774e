//! Configuration management for the gateway.
//!
//! Settings come from command-line arguments with environment variable
//! fallbacks. Provider credentials are never compiled in; they must be
//! supplied at process start.
//!
//! # Environment Variables
//!
//! - `B2_KEY_ID` - Application key id (required)
//! - `B2_APP_KEY` - Application key (required)
//! - `B2_BUCKET_ID` - Bucket to operate on (required)
//! - `B2_BUCKET_NAME` - Bucket name reported by listings (looked up when unset)
//! - `B2GW_AUTH_URL` - Authorize endpoint (default: https://api.backblazeb2.com)
//! - `B2GW_HOST` - Server bind address (default: 0.0.0.0)
//! - `B2GW_PORT` - Server port (default: 3000)
//! - `B2GW_ROOT_PREFIX` - Key prefix all paths live under (default: user/)
//! - `B2GW_FOLDER_SCOPING` - Honor the folder parameter (default: true)
//! - `B2GW_SESSION_TTL` - Session cache validity in seconds (default: 82800)
//! - `B2GW_LIST_PAGE_SIZE` - Listing page size (default: 1000)
//! - `B2GW_MAX_BODY_SIZE` - Request body limit in bytes (default: 64 MiB)
//! - `B2GW_REQUEST_TIMEOUT` - Provider connect/idle timeout in seconds (default: 60)
//! - `B2GW_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)

use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::error::ProviderError;
use crate::gateway::{GatewaySettings, DEFAULT_LIST_PAGE_SIZE, DEFAULT_ROOT_PREFIX, MAX_LIST_PAGE_SIZE};
use crate::provider::{B2Client, B2Credentials, DEFAULT_AUTH_URL, DEFAULT_SESSION_TTL};
use crate::server::{RouterConfig, DEFAULT_MAX_BODY_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default provider connect/idle timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// B2 Gateway - proxies browser file operations to Backblaze B2.
///
/// Runs the HTTP gateway when invoked without a subcommand.
#[derive(Parser, Debug, Clone)]
#[command(name = "b2-gateway")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The command to run; `serve` when none was given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP gateway
    Serve(ServeConfig),

    /// Verify credentials and bucket access, then exit
    Check(CheckConfig),
}

/// Provider connection settings shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct ProviderConfig {
    /// Application key id.
    #[arg(long, env = "B2_KEY_ID", hide_env_values = true)]
    pub key_id: Option<String>,

    /// Application key.
    #[arg(long, env = "B2_APP_KEY", hide_env_values = true)]
    pub app_key: Option<String>,

    /// Id of the bucket to operate on.
    #[arg(long, env = "B2_BUCKET_ID")]
    pub bucket_id: Option<String>,

    /// Bucket name reported by file listings.
    ///
    /// Looked up from the provider when not set.
    #[arg(long, env = "B2_BUCKET_NAME")]
    pub bucket_name: Option<String>,

    /// Base URL of the provider's authorize endpoint.
    #[arg(long, default_value = DEFAULT_AUTH_URL, env = "B2GW_AUTH_URL")]
    pub auth_url: String,

    /// Provider connect and idle-read timeout in seconds.
    ///
    /// Also bounds each JSON API call. File transfers have no total deadline.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT, env = "B2GW_REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    /// Key prefix all gateway paths live under.
    #[arg(long, default_value = DEFAULT_ROOT_PREFIX, env = "B2GW_ROOT_PREFIX")]
    pub root_prefix: String,
}

impl ProviderConfig {
    /// Validate credentials and endpoint settings.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            (&self.key_id, "Application key id is required. Set --key-id or B2_KEY_ID"),
            (&self.app_key, "Application key is required. Set --app-key or B2_APP_KEY"),
            (&self.bucket_id, "Bucket id is required. Set --bucket-id or B2_BUCKET_ID"),
        ];
        for (value, message) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(message.to_string());
            }
        }

        match url::Url::parse(&self.auth_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(format!(
                    "auth_url must be http or https, got scheme '{}'",
                    url.scheme()
                ))
            }
            Err(e) => return Err(format!("auth_url is not a valid URL: {}", e)),
        }

        if self.request_timeout == 0 {
            return Err("request_timeout must be greater than 0".to_string());
        }

        if !self.root_prefix.ends_with('/') || self.root_prefix.starts_with('/') {
            return Err(
                "root_prefix must end with '/' and must not start with '/' (e.g. \"user/\")"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Credentials for the provider client. Missing values become empty
    /// strings, which the client reports as missing on first use.
    pub fn credentials(&self) -> B2Credentials {
        B2Credentials::new(
            self.key_id.clone().unwrap_or_default(),
            self.app_key.clone().unwrap_or_default(),
        )
    }

    /// Build the provider client.
    pub fn build_client(&self) -> Result<B2Client, ProviderError> {
        B2Client::new(
            self.credentials(),
            self.auth_url.clone(),
            Duration::from_secs(self.request_timeout),
        )
    }

    /// Gateway settings with every serve-only option at its default.
    pub fn gateway_settings(&self) -> GatewaySettings {
        let mut settings = GatewaySettings::new(self.bucket_id.clone().unwrap_or_default())
            .with_root_prefix(self.root_prefix.clone());
        if let Some(name) = self.bucket_name.clone().filter(|n| !n.is_empty()) {
            settings = settings.with_bucket_name(name);
        }
        settings
    }
}

/// Settings of the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "B2GW_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "B2GW_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub provider: ProviderConfig,

    /// Honor the `folder` parameter for listings, uploads and folder deletes.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "B2GW_FOLDER_SCOPING"
    )]
    pub folder_scoping: bool,

    /// How long a provider session is reused, in seconds.
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL.as_secs(), env = "B2GW_SESSION_TTL")]
    pub session_ttl: u64,

    /// Page size of provider file listings (1-10000).
    #[arg(long, default_value_t = DEFAULT_LIST_PAGE_SIZE, env = "B2GW_LIST_PAGE_SIZE")]
    pub list_page_size: u32,

    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_SIZE, env = "B2GW_MAX_BODY_SIZE")]
    pub max_body_size: usize,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "B2GW_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.provider.validate()?;

        if self.session_ttl == 0 {
            return Err("session_ttl must be greater than 0".to_string());
        }
        if self.list_page_size == 0 || self.list_page_size > MAX_LIST_PAGE_SIZE {
            return Err(format!(
                "list_page_size must be between 1 and {}",
                MAX_LIST_PAGE_SIZE
            ));
        }
        if self.max_body_size < 1024 {
            return Err("max_body_size must be at least 1KB".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Gateway settings derived from this configuration.
    pub fn gateway_settings(&self) -> GatewaySettings {
        self.provider
            .gateway_settings()
            .with_folder_scoping(self.folder_scoping)
            .with_list_page_size(self.list_page_size)
            .with_session_ttl(Duration::from_secs(self.session_ttl))
    }

    /// Router settings derived from this configuration.
    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::default()
            .with_max_body_size(self.max_body_size)
            .with_tracing(!self.no_tracing);
        if let Some(ref origins) = self.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        config
    }
}

/// Settings of the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub provider: ProviderConfig,

    /// List the folders under the root prefix.
    #[arg(long, default_value_t = false)]
    pub list_folders: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
