use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::scheduler::DEFAULT_SAFETY_MARGIN_SECS;

/// Ticketing session client - Rust Implementation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'u', long, env = "BACKEND_URL", default_value = "http://localhost:8080")]
    pub backend_url: String,

    /// Path to the session SQLite database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Seconds before token expiry at which the silent refresh fires
    #[arg(long, env = "REFRESH_SAFETY_MARGIN", default_value_t = DEFAULT_SAFETY_MARGIN_SECS)]
    pub refresh_margin: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and persist the session
    Login {
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long, env = "SESSION_PASSWORD")]
        password: Option<String>,
        #[arg(long)]
        remember_me: bool,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(short, long)]
        email: String,
        #[arg(long)]
        phone: String,
        /// CUSTOMER or ORGANIZER
        #[arg(long, default_value = "CUSTOMER")]
        role: String,
        #[arg(long)]
        referral_code: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show whether a valid session is stored
    Status,
    /// Fetch the current profile from the backend
    Whoami,
    /// Issue an authorized GET and print the body
    Get { path: String },
}

/// Upper bound for the credential storage ceiling
pub const MAX_STORAGE_AGE_DAYS: i64 = 3650;

/// Backend endpoint paths
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub login: String,
    pub logout: String,
    pub refresh: String,
    pub register: String,
    pub me: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/v1/auth/login".to_string(),
            logout: "/api/v1/auth/logout".to_string(),
            refresh: "/api/v1/auth/refresh".to_string(),
            register: "/api/v1/users/register".to_string(),
            me: "/api/v1/auth/me".to_string(),
        }
    }
}

impl Endpoints {
    /// Defaults overridden by `AUTH_*_PATH` environment variables
    fn from_env() -> Self {
        let defaults = Self::default();
        let path = |var: &str, default: String| std::env::var(var).unwrap_or(default);
        Self {
            login: path("AUTH_LOGIN_PATH", defaults.login),
            logout: path("AUTH_LOGOUT_PATH", defaults.logout),
            refresh: path("AUTH_REFRESH_PATH", defaults.refresh),
            register: path("AUTH_REGISTER_PATH", defaults.register),
            me: path("AUTH_ME_PATH", defaults.me),
        }
    }
}

/// Settings consumed by the session manager
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub backend_url: String,
    pub endpoints: Endpoints,

    // Refresh scheduling
    pub refresh_safety_margin: Duration,

    // Storage ceiling, independent of token expiry
    pub storage_max_age: chrono::Duration,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
}

impl SessionConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            endpoints: Endpoints::default(),
            refresh_safety_margin: Duration::from_secs(DEFAULT_SAFETY_MARGIN_SECS),
            storage_max_age: chrono::Duration::days(7),
            http_connect_timeout: 10,
            http_request_timeout: 30,
        }
    }

    /// Absolute URL for a backend path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.backend_url, path.trim_start_matches('/'))
    }

    /// HTTP client with the configured timeouts
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.http_connect_timeout))
            .timeout(Duration::from_secs(self.http_request_timeout))
            .build()
            .context("Failed to create HTTP client")
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: String,
    pub session_db_file: PathBuf,
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let session_db_file = match args.db_file {
            Some(ref path) => expand_tilde(path),
            None => default_db_path().context(
                "Could not determine a data directory (use -d or set SESSION_DB_FILE)",
            )?,
        };

        let mut session = SessionConfig::new(args.backend_url.clone());
        session.endpoints = Endpoints::from_env();
        session.refresh_safety_margin = Duration::from_secs(args.refresh_margin);
        session.http_request_timeout = args.http_timeout;
        session.http_connect_timeout = std::env::var("HTTP_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let max_age_days: i64 = std::env::var("SESSION_MAX_AGE_DAYS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7);
        session.storage_max_age = chrono::Duration::try_days(max_age_days)
            .with_context(|| format!("SESSION_MAX_AGE_DAYS out of range: {}", max_age_days))?;

        Ok(Self {
            log_level: args.log_level.clone(),
            session_db_file,
            session,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.session.backend_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("BACKEND_URL must start with http:// or https://: {}", url);
        }
        let max_age = self.session.storage_max_age;
        if max_age <= chrono::Duration::zero() || max_age.num_days() > MAX_STORAGE_AGE_DAYS {
            anyhow::bail!(
                "SESSION_MAX_AGE_DAYS must be between 1 and {}",
                MAX_STORAGE_AGE_DAYS
            );
        }
        Ok(())
    }
}

/// Default database location under the user's data directory
fn default_db_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("ticketing-session").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
