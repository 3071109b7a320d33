//! Vulnerability enrichment.
//!
//! A [`VulnerabilityChecker`] maps `(package, version)` pairs to known
//! vulnerabilities. Lookups are best effort: a package whose lookup fails
//! after retries is reported with an empty list and a warning, never as a
//! scan failure.

mod nvd;

pub use nvd::{search_keyword, NvdChecker};

use std::collections::HashMap;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::ScanError;
use crate::model::VulnRecord;

#[async_trait]
pub trait VulnerabilityChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Looks up every `(name, upstream version)` pair. The result holds an
    /// entry per requested name, each list sorted by severity then score,
    /// descending.
    async fn check(
        &self,
        packages: &[(String, String)],
    ) -> Result<HashMap<String, Vec<VulnRecord>>, ScanError>;
}

/// Tuning knobs shared by network-backed checkers.
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// Lookups in flight at once.
    pub concurrency: usize,
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub backoff: Duration,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retries: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

impl CheckerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.vuln_concurrency.max(1),
            retries: config.vuln_retries,
            ..Self::default()
        }
    }
}

/// The NVD checker configured from `config`, with the on-disk cache.
pub fn default_checker(config: &Config) -> NvdChecker {
    let api_key = config
        .nvd_api_key
        .clone()
        .or_else(|| std::env::var("NVD_API_KEY").ok())
        .filter(|key| !key.is_empty());

    NvdChecker::new(api_key)
        .with_options(CheckerOptions::from_config(config))
        .with_cache(crate::cache::Cache::with_ttl_hours(config.cache_ttl_hours))
}

/// Reduces a distribution version to the upstream version searched for.
/// Already normalized versions come back unchanged.
///
/// ```
/// use bootsbom::checker::normalize_version;
///
/// assert_eq!(normalize_version("1:8.2p1-4ubuntu0.13"), "8.2p1");
/// assert_eq!(normalize_version("245.4-4ubuntu3.21"), "245.4");
/// assert_eq!(normalize_version("2.0.9"), "2.0.9");
/// ```
pub fn normalize_version(version: &str) -> String {
    static EPOCH: OnceLock<Option<Regex>> = OnceLock::new();
    static CORE: OnceLock<Option<Regex>> = OnceLock::new();

    let version = version.trim();
    let without_epoch = match EPOCH.get_or_init(|| Regex::new(r"^\d+:").ok()) {
        Some(re) => re.replace(version, "").into_owned(),
        None => version.to_string(),
    };

    if let Some(found) = CORE
        .get_or_init(|| Regex::new(r"^\d+(?:\.\d+)*(?:p\d+)?").ok())
        .as_ref()
        .and_then(|re| re.find(&without_epoch))
    {
        return found.as_str().to_string();
    }

    without_epoch
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Runs `op` until it succeeds or `retries` extra attempts are used,
/// sleeping `backoff * 2^n` between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    retries: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScanError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                let delay = backoff.saturating_mul(2u32.saturating_pow(attempt));
                debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying lookup");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
