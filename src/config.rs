use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "research-catalog.json";
pub(crate) const DEFAULT_SEARCH_LIMIT: usize = 200;

/// Runtime configuration, built once at startup and handed to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) db_path: PathBuf,
    pub(crate) upload_dir: PathBuf,
    pub(crate) static_dir: PathBuf,
    pub(crate) bind: String,
    pub(crate) port: u16,
    pub(crate) workers: usize,
    pub(crate) search_limit: usize,
    pub(crate) max_upload_bytes: u64,
    /// When false the full-text index is never created and search always
    /// takes the substring path.
    pub(crate) full_text: bool,
    pub(crate) ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) api_key: Option<String>,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("research.db"),
            upload_dir: PathBuf::from("uploads"),
            static_dir: PathBuf::from("static"),
            bind: "127.0.0.1".to_string(),
            port: 5000,
            workers: 4,
            search_limit: DEFAULT_SEARCH_LIMIT,
            max_upload_bytes: 50 * 1024 * 1024,
            full_text: true,
            ai: AiConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Defaults, then the config file, then environment overrides.
    ///
    /// An explicit `path` must exist; otherwise `research-catalog.json` in the
    /// working directory is read when present.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => load_file_config(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    load_file_config(default)?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env(env_optional)?;
        Ok(config)
    }

    pub(crate) fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RESEARCH_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESEARCH_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESEARCH_STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RESEARCH_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("RESEARCH_PORT") {
            self.port = parse_var("RESEARCH_PORT", &v)?;
        }
        if let Some(v) = lookup("RESEARCH_DISABLE_FTS") {
            self.full_text = !parse_bool(&v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.ai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.ai.model = v;
        }
        if let Some(v) = lookup("OPENAI_MAX_TOKENS") {
            self.ai.max_tokens = parse_var("OPENAI_MAX_TOKENS", &v)?;
        }
        Ok(())
    }

    pub(crate) fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

pub(crate) fn load_file_config(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| CatalogError::Config(format!("read {}: {e}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|e| CatalogError::Config(format!("parse {}: {e}", path.display())))
}

pub(crate) fn save_file_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| CatalogError::Config(format!("serialize config: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| CatalogError::Config(format!("Invalid {name}")))
}

fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.db_path, PathBuf::from("research.db"));
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert_eq!(config.listen_addr(), "127.0.0.1:5000");
        assert_eq!(config.search_limit, 200);
        assert!(config.full_text);
        assert_eq!(config.ai.model, "gpt-4o-mini");
        assert_eq!(config.ai.max_tokens, 400);
        assert!(config.ai.api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup_from(&[
                ("RESEARCH_DB_PATH", "/tmp/x.db"),
                ("RESEARCH_PORT", "8080"),
                ("RESEARCH_DISABLE_FTS", "yes"),
                ("OPENAI_API_KEY", "sk-test"),
            ]))
            .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.port, 8080);
        assert!(!config.full_text);
        assert_eq!(config.ai.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_invalid_env_port() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup_from(&[("RESEARCH_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }

    #[test]
    fn test_file_round_trip_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research-catalog.json");
        std::fs::write(&path, r#"{"port": 7000, "ai": {"model": "gpt-4o"}}"#).unwrap();

        let config = load_file_config(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.ai.model, "gpt-4o");
        assert_eq!(config.ai.max_tokens, 400);
        assert_eq!(config.bind, "127.0.0.1");

        save_file_config(&path, &config).unwrap();
        let again = load_file_config(&path).unwrap();
        assert_eq!(again.port, 7000);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
