use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{AdminError, Result};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CorsOrigins {
    Any(AnyOrigin),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum AnyOrigin {
    #[serde(rename = "*")]
    Any,
}

impl CorsOrigins {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "*" {
            return Self::Any(AnyOrigin::Any);
        }
        Self::List(
            trimmed
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        )
    }
}

impl Default for CorsOrigins {
    fn default() -> Self {
        Self::List(vec![
            "http://localhost:3000".to_string(),
            "http://localhost:5173".to_string(),
        ])
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub api_token: String,
    pub cors_origins: CorsOrigins,
    pub default_page_size: u32,
    /// `tracing` directives, e.g. `info,tvdiag_admin=debug`.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            db_path: crate::runtime_paths::default_db_path(),
            api_token: String::new(),
            cors_origins: CorsOrigins::default(),
            default_page_size: 20,
            log_filter: None,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            AdminError::Config(format!("failed to read {}: {e}", path.to_string_lossy()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AdminError::Config(format!("invalid config {}: {e}", path.to_string_lossy()))
        })
    }

    /// Loads `path` (or `config.json` under the app root when present), then
    /// layers `TVDIAG_*` environment overrides on top. Callers run
    /// [`Config::validate`] once logging is up.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fallback = crate::runtime_paths::default_config_path();
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None if fallback.is_file() => Self::from_file(&fallback)?,
            None => Self::default(),
        };
        base.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(host) = var("TVDIAG_HOST") {
            self.host = host;
        }
        if let Some(port) = var("TVDIAG_PORT") {
            self.port = port
                .parse()
                .map_err(|e| AdminError::Config(format!("invalid TVDIAG_PORT value: {e}")))?;
        }
        if let Some(db_path) = var("TVDIAG_DB") {
            self.db_path = db_path;
        }
        if let Some(token) = var("TVDIAG_API_TOKEN") {
            self.api_token = token;
        }
        if let Some(origins) = var("TVDIAG_CORS_ORIGINS") {
            self.cors_origins = CorsOrigins::parse(&origins);
        }
        if let Some(size) = var("TVDIAG_DEFAULT_PAGE_SIZE") {
            self.default_page_size = size.parse().map_err(|e| {
                AdminError::Config(format!("invalid TVDIAG_DEFAULT_PAGE_SIZE value: {e}"))
            })?;
        }

        if let Some(filter) = var("TVDIAG_LOG") {
            self.log_filter = Some(filter);
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AdminError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(AdminError::Config("port must be non-zero".to_string()));
        }
        if self.db_path.trim().is_empty() {
            return Err(AdminError::Config("db_path must not be empty".to_string()));
        }
        if self.default_page_size == 0 || self.default_page_size > MAX_PAGE_SIZE {
            return Err(AdminError::Config(format!(
                "default_page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.api_token.trim().is_empty() {
            tracing::warn!("No API token configured; every /api/v1 request will be rejected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TVDIAG_PORT", "8080"),
            ("TVDIAG_API_TOKEN", " secret "),
            ("TVDIAG_LOG", "warn"),
            ("TVDIAG_CORS_ORIGINS", "https://admin.example.com, https://ops.example.com"),
        ]);
        let config = Config {
            db_path: "/tmp/tvdiag.db".to_string(),
            ..Config::default()
        }
        .apply_env_with(|key| env.get(key).map(|value| value.to_string()))
        .expect("config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.log_filter.as_deref(), Some("warn"));
        assert_eq!(
            config.cors_origins,
            CorsOrigins::List(vec![
                "https://admin.example.com".to_string(),
                "https://ops.example.com".to_string()
            ])
        );
    }

    #[test]
    fn rejects_bad_port_and_page_size() {
        let err = Config::default()
            .apply_env_with(|key| (key == "TVDIAG_PORT").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, AdminError::Config(_)));

        let err = Config {
            default_page_size: 500,
            ..Config::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, AdminError::Config(_)));
    }

    #[test]
    fn env_overlay_defers_validation_to_the_caller() {
        let config = Config::default()
            .apply_env_with(|key| (key == "TVDIAG_DEFAULT_PAGE_SIZE").then(|| "500".to_string()))
            .expect("overlay");
        assert_eq!(config.default_page_size, 500);
        assert!(matches!(config.validate(), Err(AdminError::Config(_))));
    }

    #[test]
    fn parses_wildcard_origin_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"port": 4000, "api_token": "t", "cors_origins": "*"}"#,
        )
        .expect("write config");

        let config = Config::from_file(&path).expect("config");
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.cors_origins, CorsOrigins::Any(AnyOrigin::Any));
    }
}
