//! Configuration file handling.
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/bootsbom/config.toml`
//! - macOS: `~/Library/Application Support/bootsbom/config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! cache_ttl_hours = 24
//! skip_vuln_check = false
//! default_format = "table"
//! startup_only = false
//! parallel = true
//! vuln_concurrency = 4
//! vuln_retries = 2
//! log_level = "info"
//! log_format = "pretty"
//!
//! [ignore]
//! packages = ["linux-image-*"]
//! vulnerabilities = ["CVE-2021-12345"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration.
///
/// Every field has a default, so a partial file (or none at all) is valid.
///
/// ```no_run
/// use bootsbom::Config;
///
/// let config = Config::load().unwrap();
/// println!("Cache TTL: {} hours", config.cache_ttl_hours);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long vulnerability lookups stay cached, in hours.
    pub cache_ttl_hours: u64,

    pub skip_vuln_check: bool,

    /// Output format when `--format` is not given: "table", "json" or
    /// "cyclonedx".
    pub default_format: String,

    /// Restrict service discovery to services started at boot.
    pub startup_only: bool,

    /// Run backends on blocking worker tasks concurrently.
    pub parallel: bool,

    pub vuln_concurrency: usize,

    pub vuln_retries: u32,

    /// Default tracing filter; `RUST_LOG` takes precedence.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// NVD API key. Falls back to the `NVD_API_KEY` environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvd_api_key: Option<String>,

    #[serde(default)]
    pub ignore: IgnoreConfig,
}

/// Suppression lists for accepted risks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Package names (glob patterns with `*`) skipped by vulnerability
    /// lookups. They still appear in the inventory.
    pub packages: Vec<String>,

    /// Vulnerability ids never reported.
    pub vulnerabilities: Vec<String>,
}

impl IgnoreConfig {
    pub fn should_ignore_package(&self, name: &str) -> bool {
        self.packages.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, name)
            } else {
                pattern == name
            }
        })
    }

    pub fn should_ignore_vulnerability(&self, vuln_id: &str) -> bool {
        self.vulnerabilities.iter().any(|id| id == vuln_id)
    }
}

/// Simple glob matching (supports * as wildcard).
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_hours: 24,
            skip_vuln_check: false,
            default_format: "table".to_string(),
            startup_only: false,
            parallel: true,
            vuln_concurrency: 4,
            vuln_retries: 2,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            nvd_api_key: None,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration, or the defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration, creating the parent directory if needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bootsbom")
            .join("config.toml")
    }

    /// The default configuration rendered as TOML.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
