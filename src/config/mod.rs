use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub book_api: BookApiConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub invitations: InvitationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory with the prebuilt UI served as a fallback for non-API routes
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Name of the HTTP-only session cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark the session cookie `Secure` (disable only for local http development)
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Super admin account ensured at startup (both fields must be set)
    pub super_admin_email: Option<String>,
    pub super_admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secure_cookies: true,
            session_days: default_session_days(),
            super_admin_email: None,
            super_admin_password: None,
        }
    }
}

fn default_cookie_name() -> String {
    "bookworm_session".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookApiConfig {
    /// Base URL of the volumes API (Google Books compatible)
    #[serde(default = "default_book_api_url")]
    pub base_url: String,
    pub api_key: Option<String>,
    /// Calls allowed per UTC day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i64,
    /// Remaining quota below which no further calls are issued
    #[serde(default = "default_quota_floor")]
    pub quota_floor: i64,
    /// Upper bound on entries checked by one validation batch
    #[serde(default = "default_max_batch")]
    pub max_batch: i64,
    #[serde(default = "default_book_api_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BookApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_book_api_url(),
            api_key: None,
            daily_limit: default_daily_limit(),
            quota_floor: default_quota_floor(),
            max_batch: default_max_batch(),
            timeout_seconds: default_book_api_timeout(),
        }
    }
}

fn default_book_api_url() -> String {
    "https://www.googleapis.com/books/v1".to_string()
}

fn default_daily_limit() -> i64 {
    1000
}

fn default_quota_floor() -> i64 {
    50
}

fn default_max_batch() -> i64 {
    100
}

fn default_book_api_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_api_requests() -> u32 {
    300
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    /// Days before an unaccepted delegate invitation expires
    #[serde(default = "default_invitation_days")]
    pub expires_in_days: i64,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            expires_in_days: default_invitation_days(),
        }
    }
}

fn default_invitation_days() -> i64 {
    7
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("bookworm.db")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            book_api: BookApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            invitations: InvitationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.cookie_name, "bookworm_session");
        assert_eq!(config.book_api.quota_floor, 50);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [book_api]
            daily_limit = 200
            api_key = "abc"

            [auth]
            secure_cookies = false
            "#,
        )
        .unwrap();
        assert_eq!(config.book_api.daily_limit, 200);
        assert_eq!(config.book_api.max_batch, 100);
        assert_eq!(config.book_api.api_key.as_deref(), Some("abc"));
        assert!(!config.auth.secure_cookies);
        assert_eq!(config.auth.session_days, 7);
    }
}
