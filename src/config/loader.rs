use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::Settings;

/// Prefix of environment variables that override file settings, e.g. `APP_TIER=prod`
/// or `APP_LOG__LEVEL=debug`.
pub const ENV_PREFIX: &str = "APP";

/// Load settings from an optional file, overridden by `APP_*` environment variables.
/// Supports multiple file formats: YAML, JSON, TOML, etc.
pub fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        builder = builder.add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            file_format(path),
        ));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build settings from {config_path:?}"))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize settings from {config_path:?}"))
}

/// Determine file format based on extension
fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::Tier;

    #[test]
    fn test_load_toml_settings() {
        let toml_content = r#"
tier = "staging"
listen_addr = "127.0.0.1:3000"
max_body_bytes = 1024

[log]
level = "debug"

[log.file]
path = "/tmp/trailhead/main.log"

[redaction]
sensitive_routes = ["Register", "Login"]
sensitive_fields = ["password", "pin"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let settings = load_settings(temp_file.path().to_str()).unwrap();
        assert_eq!(settings.tier, Tier::Staging);
        assert_eq!(settings.listen_addr, "127.0.0.1:3000");
        assert_eq!(settings.max_body_bytes, 1024);
        assert_eq!(settings.log.level, "debug");
        assert_eq!(settings.log.file.path, "/tmp/trailhead/main.log");
        assert_eq!(settings.log.file.max_age_days, 30);
        assert!(settings.redaction.is_sensitive_route("Login"));
        assert!(settings.redaction.is_sensitive_field("pin"));
    }

    #[test]
    fn test_load_json_settings() {
        let json_content = r#"
{
  "tier": "prod",
  "redaction": { "sensitive_routes": [], "sensitive_fields": ["secret"] }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let settings = load_settings(temp_file.path().to_str()).unwrap();
        assert_eq!(settings.tier, Tier::Prod);
        assert!(settings.redaction.sensitive_routes.is_empty());
        assert!(settings.redaction.is_sensitive_field("secret"));
        assert!(!settings.redaction.is_sensitive_field("password"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_settings(Some("/nonexistent/trailhead.toml")).is_err());
    }
}
