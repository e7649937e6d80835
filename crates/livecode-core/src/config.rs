//! Configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{EXEC_PATH, LIVECODE_PATH, RUNTIMES_PATH};

/// Environment variable that points at an explicit config file.
pub const CONFIG_FILE_ENV: &str = "LIVECODE_CONFIG_FILE";

/// Top-level LiveCode client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Runtime used when a run does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub canvas: CanvasConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the LiveCode server, e.g. `https://livecode.example.com/`.
    /// A `ws://` or `wss://` URL is used verbatim as the streaming endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8010/".into()
}

impl ServerConfig {
    /// Streaming endpoint derived from the base URL.
    pub fn livecode_url(&self) -> String {
        livecode_url(&self.base_url)
    }

    /// HTTP root of the server, without a trailing slash. `ws(s)://`
    /// endpoints map back to `http(s)://` on the same host.
    pub fn http_base(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("wss://") {
            format!("https://{}", host_part(rest))
        } else if let Some(rest) = base.strip_prefix("ws://") {
            format!("http://{}", host_part(rest))
        } else {
            base.to_string()
        }
    }

    /// One-shot HTTP exec endpoint derived from the base URL.
    pub fn exec_url(&self) -> String {
        format!("{}{EXEC_PATH}", self.http_base())
    }

    /// Plain-text endpoint for one runtime.
    pub fn runtime_url(&self, runtime: &str) -> String {
        format!("{}{RUNTIMES_PATH}/{runtime}", self.http_base())
    }
}

/// Map `http(s)://host/...` to `ws(s)://host/livecode`; pass `ws(s)://` through.
pub fn livecode_url(base_url: &str) -> String {
    if base_url.starts_with("ws://") || base_url.starts_with("wss://") {
        return base_url.to_string();
    }
    let (scheme, rest) = match base_url.strip_prefix("https://") {
        Some(rest) => ("wss", rest),
        None => ("ws", base_url.strip_prefix("http://").unwrap_or(base_url)),
    };
    format!("{scheme}://{}{LIVECODE_PATH}", host_part(rest))
}

fn host_part(rest: &str) -> &str {
    rest.split('/').next().unwrap_or(rest)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds to wait for the transport to open (unset = wait forever).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    /// Seconds without an inbound frame before the session is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// Connect retry policy. Retries only happen before the run request is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra connect attempts after the first failure (0 = no retry).
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Logical coordinate space drawing commands are authored against.
    #[serde(default = "default_logical_size")]
    pub logical_width: f64,
    #[serde(default = "default_logical_size")]
    pub logical_height: f64,

    /// Pixel size of the CLI's recording surface.
    #[serde(default = "default_pixel_size")]
    pub pixel_width: f64,
    #[serde(default = "default_pixel_size")]
    pub pixel_height: f64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            logical_width: default_logical_size(),
            logical_height: default_logical_size(),
            pixel_width: default_pixel_size(),
            pixel_height: default_pixel_size(),
        }
    }
}

fn default_logical_size() -> f64 {
    300.0
}

fn default_pixel_size() -> f64 {
    600.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "livecode_session=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid")
    });
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::LiveCodeError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::LiveCodeError::Config(e.to_string()))?;

        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Config file path: `$LIVECODE_CONFIG_FILE`, else `~/.livecode/config.json`.
    pub fn default_path() -> PathBuf {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => data_dir().join("config.json"),
        }
    }

    pub fn runtime(&self) -> &str {
        self.runtime.as_deref().unwrap_or("python")
    }

    /// Returns (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let url = &self.server.base_url;
        if !["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            errors.push(format!("server.base_url has an unsupported scheme: {url}"));
        }

        if self.canvas.logical_width <= 0.0 || self.canvas.logical_height <= 0.0 {
            errors.push("canvas logical size must be positive".into());
        }

        let retry = &self.session.retry;
        if retry.max_attempts > 0 && retry.initial_backoff_ms > retry.max_backoff_ms {
            warnings.push(format!(
                "session.retry.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                retry.initial_backoff_ms, retry.max_backoff_ms
            ));
        }

        if self.session.idle_timeout_secs == Some(0) {
            warnings.push("session.idle_timeout_secs = 0 closes every session immediately".into());
        }

        (warnings, errors)
    }
}

/// Base directory for LiveCode client data: `~/.livecode/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".livecode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_LC_HOST", "livecode.example.com") };
        let input = r#"{"server": {"base_url": "https://${TEST_LC_HOST}/"}}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("https://livecode.example.com/"));
        unsafe { std::env::remove_var("TEST_LC_HOST") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"runtime": "${NONEXISTENT_VAR_LC_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime(), "python");
        assert_eq!(config.server.livecode_url(), "ws://localhost:8010/livecode");
        assert_eq!(config.canvas.logical_width, 300.0);
        assert_eq!(config.session.retry.max_attempts, 0);
        assert!(config.session.connect_timeout().is_none());
    }

    #[test]
    fn test_livecode_url_derivation() {
        assert_eq!(
            livecode_url("https://livecode.example.com/"),
            "wss://livecode.example.com/livecode"
        );
        assert_eq!(
            livecode_url("http://127.0.0.1:8010/some/page"),
            "ws://127.0.0.1:8010/livecode"
        );
        assert_eq!(livecode_url("ws://host:1/custom"), "ws://host:1/custom");
    }

    #[test]
    fn test_exec_url_derivation() {
        let server = ServerConfig {
            base_url: "https://livecode.example.com/".into(),
        };
        assert_eq!(server.exec_url(), "https://livecode.example.com/exec");

        let server = ServerConfig {
            base_url: "ws://127.0.0.1:9000/livecode".into(),
        };
        assert_eq!(server.exec_url(), "http://127.0.0.1:9000/exec");
        assert_eq!(server.runtime_url("python"), "http://127.0.0.1:9000/runtimes/python");
        assert_eq!(server.http_base(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/livecode/config.json")).unwrap();
        assert_eq!(config.runtime(), "python");
    }

    #[test]
    fn test_load_json5_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // trailing commas and comments are fine
                server: { base_url: "https://livecode.example.com/" },
                runtime: "python-canvas",
                session: { connect_timeout_secs: 5, retry: { max_attempts: 2 } },
                canvas: { pixel_width: 900 },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.runtime(), "python-canvas");
        assert_eq!(config.session.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.session.retry.max_attempts, 2);
        assert_eq!(config.session.retry.initial_backoff_ms, 200);
        assert_eq!(config.canvas.pixel_width, 900.0);
        assert_eq!(config.canvas.pixel_height, 600.0);
        assert_eq!(config.canvas.logical_width, 300.0);
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ server: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::LiveCodeError::Config(_)));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_bad_scheme_errors() {
        let config = Config {
            server: ServerConfig {
                base_url: "ftp://example.com".into(),
            },
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("scheme")),
            "Expected a scheme error, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_default_is_clean() {
        let (warnings, errors) = Config::default().validate();
        assert!(warnings.is_empty());
        assert!(errors.is_empty());
    }
}
