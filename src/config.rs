use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Remote embedding service settings. `endpoint = None` is a valid state:
/// vector search degrades to zero candidates and backfill is skipped.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            batch_timeout_secs: default_batch_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    50
}
fn default_batch_timeout_secs() -> u64 {
    300
}
fn default_query_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Browser profile directory holding `History` and `Bookmarks`.
    #[serde(default)]
    pub profile: Option<PathBuf>,
    /// Origin-of-record tag written to every ingested row.
    #[serde(default = "default_browser_label")]
    pub label: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            profile: None,
            label: default_browser_label(),
        }
    }
}

impl BrowserConfig {
    /// Resolved profile directory: explicit config wins, otherwise the
    /// default Vivaldi profile under the user's home.
    pub fn profile_dir(&self) -> Result<PathBuf> {
        if let Some(ref p) = self.profile {
            return Ok(p.clone());
        }
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .context("HOME not set; configure [browser].profile explicitly")?;
        Ok(home.join(".config").join("vivaldi").join("Default"))
    }
}

fn default_browser_label() -> String {
    "vivaldi".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7411".to_string()
}

impl Config {
    /// Minimal config pointing at a database path, with every other section
    /// at its default. Used by tests and store-only commands.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            embedding: EmbeddingConfig::default(),
            browser: BrowserConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if let Some(ref endpoint) = config.embedding.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            anyhow::bail!(
                "embedding.endpoint must be an http(s) URL, got '{}'",
                endpoint
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config: Config = toml::from_str("[db]\npath = \"/tmp/pt.sqlite\"\n").unwrap();
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.embedding.batch_size, 50);
        assert_eq!(config.browser.label, "vivaldi");
    }

    #[test]
    fn test_endpoint_enables_embedding() {
        let config: Config = toml::from_str(
            "[db]\npath = \"/tmp/pt.sqlite\"\n[embedding]\nendpoint = \"http://localhost:8080\"\n",
        )
        .unwrap();
        assert!(config.embedding.is_enabled());
    }
}
