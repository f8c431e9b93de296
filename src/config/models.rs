//! Configuration data structures for trailhead.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and to
//! `APP_*` environment variables. Every section carries defaults so that an empty
//! configuration yields a runnable local server.
use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

/// Deployment tier. Selects where logs are written.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Developer machine: pretty console logs
    #[default]
    Local,
    Testing,
    Staging,
    Prod,
}

impl Tier {
    /// Tiers other than `local` log JSON lines to a rotating file.
    pub fn logs_to_file(&self) -> bool {
        !matches!(self, Tier::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Testing => "testing",
            Tier::Staging => "staging",
            Tier::Prod => "prod",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotating log file settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FileLogConfig {
    /// Active log file; rotated backups are written next to it
    pub path: String,
    /// Size at which the active file is rotated (in bytes)
    pub max_size_bytes: u64,
    /// Rotated files older than this are deleted
    pub max_age_days: u64,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: "./logs/main.log".to_string(),
            max_size_bytes: 16 * 1024 * 1024,
            max_age_days: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub file: FileLogConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: FileLogConfig::default(),
        }
    }
}

/// Which requests and fields must be masked before they reach the access log.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RedactionPolicy {
    /// Route names whose JSON body is redacted field by field
    pub sensitive_routes: HashSet<String>,
    /// Field names masked wherever they appear in a body
    pub sensitive_fields: HashSet<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            sensitive_routes: HashSet::from(["Register".to_string()]),
            sensitive_fields: HashSet::from(["password".to_string()]),
        }
    }
}

impl RedactionPolicy {
    pub fn new<R, F>(routes: R, fields: F) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            sensitive_routes: routes.into_iter().map(Into::into).collect(),
            sensitive_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_sensitive_route(&self, name: &str) -> bool {
        self.sensitive_routes.contains(name)
    }

    /// Exact match, as used for JSON and multipart keys.
    pub fn is_sensitive_field(&self, key: &str) -> bool {
        self.sensitive_fields.contains(key)
    }

    /// Lower-cased key lookup, as used for url-encoded form keys.
    pub fn is_sensitive_field_ignore_case(&self, key: &str) -> bool {
        self.sensitive_fields.contains(&key.to_lowercase())
    }
}

/// CORS response settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: String,
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: "*".to_string(),
            allow_methods: "GET,POST,PUT,PATCH,DELETE,OPTIONS".to_string(),
            allow_headers: "authorization, origin, content-type, accept, content-disposition"
                .to_string(),
        }
    }
}

/// Top-level settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub tier: Tier,
    pub listen_addr: String,
    /// Largest request body buffered for logging; larger bodies get a 413
    pub max_body_bytes: usize,
    pub shutdown_timeout_secs: u64,
    pub log: LogConfig,
    pub redaction: RedactionPolicy,
    pub cors: CorsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tier: Tier::default(),
            listen_addr: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
            shutdown_timeout_secs: 30,
            log: LogConfig::default(),
            redaction: RedactionPolicy::default(),
            cors: CorsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_masks_password_on_register() {
        let policy = RedactionPolicy::default();
        assert!(policy.is_sensitive_route("Register"));
        assert!(policy.is_sensitive_field("password"));
        assert!(!policy.is_sensitive_field("Password"));
        assert!(policy.is_sensitive_field_ignore_case("Password"));
    }

    #[test]
    fn test_tier_file_logging() {
        assert!(!Tier::Local.logs_to_file());
        assert!(Tier::Prod.logs_to_file());
        assert_eq!(Tier::Staging.to_string(), "staging");
    }
}
