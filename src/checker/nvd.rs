use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{normalize_version, retry_with_backoff, CheckerOptions};
use crate::cache::Cache;
use crate::error::ScanError;
use crate::model::{sort_by_severity, Severity, VulnRecord};

const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Maximum number of CVEs kept per package.
const MAX_RESULTS: usize = 25;

const MAX_DESCRIPTION_CHARS: usize = 200;

/// NVD asks for one request per 6 seconds without a key, 0.6 with one.
const DELAY_WITHOUT_KEY: Duration = Duration::from_secs(6);
const DELAY_WITH_KEY: Duration = Duration::from_millis(600);

/// Keyword search against the NVD CVE API 2.0.
pub struct NvdChecker {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    options: CheckerOptions,
    request_delay: Duration,
    cache: Option<Cache>,
}

impl NvdChecker {
    pub fn new(api_key: Option<String>) -> Self {
        let request_delay = if api_key.is_some() {
            DELAY_WITH_KEY
        } else {
            DELAY_WITHOUT_KEY
        };
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: NVD_API_URL.to_string(),
            options: CheckerOptions::default(),
            request_delay,
            cache: None,
        }
    }

    pub fn with_options(mut self, options: CheckerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    fn cache_key(name: &str, version: &str) -> String {
        format!("nvd_{}_{}", name, version)
    }

    async fn query(&self, keyword: &str) -> Result<Vec<VulnRecord>, ScanError> {
        let enrichment_error = |reason: String| ScanError::Enrichment {
            package: keyword.to_string(),
            reason,
        };

        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("keywordSearch", keyword)])
            .query(&[("resultsPerPage", MAX_RESULTS.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| enrichment_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(enrichment_error(format!("NVD returned {}", status)));
        }

        let body: NvdResponse = response
            .json()
            .await
            .map_err(|e| enrichment_error(e.to_string()))?;

        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(vulns_from_response(body))
    }

    async fn lookup(&self, name: &str, version: &str) -> Result<Vec<VulnRecord>, ScanError> {
        let key = Self::cache_key(name, version);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get::<Vec<VulnRecord>>(&key)) {
            debug!(package = name, "vulnerability cache hit");
            return Ok(cached);
        }

        let keyword = search_keyword(name, version);
        let vulns = retry_with_backoff(self.options.retries, self.options.backoff, || {
            self.query(&keyword)
        })
        .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &vulns) {
                debug!(error = %e, "failed to cache vulnerability lookup");
            }
        }
        Ok(vulns)
    }
}

#[async_trait]
impl super::VulnerabilityChecker for NvdChecker {
    fn name(&self) -> &'static str {
        "NVD"
    }

    async fn check(
        &self,
        packages: &[(String, String)],
    ) -> Result<HashMap<String, Vec<VulnRecord>>, ScanError> {
        info!(packages = packages.len(), "checking vulnerabilities against NVD");

        let lookups: Vec<_> = packages
            .iter()
            .map(|(name, version)| async move {
                let vulns = match self.lookup(name, version).await {
                    Ok(vulns) => vulns,
                    Err(e) => {
                        warn!(package = %name, error = %e, "vulnerability lookup failed");
                        Vec::new()
                    }
                };
                (name.clone(), vulns)
            })
            .collect();
        let results: Vec<(String, Vec<VulnRecord>)> = stream::iter(lookups)
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        Ok(results
            .into_iter()
            .map(|(name, mut vulns)| {
                sort_by_severity(&mut vulns);
                (name, vulns)
            })
            .collect())
    }
}

/// The NVD keyword for a package: the name without architecture suffix or
/// packaging decoration, followed by the upstream version.
///
/// ```
/// use bootsbom::checker::search_keyword;
///
/// assert_eq!(search_keyword("libssl3:amd64", "3.0.2-0ubuntu1.10"), "ssl3 3.0.2");
/// assert_eq!(search_keyword("openssh-server", "1:8.9p1-3"), "openssh-server 8.9p1");
/// ```
pub fn search_keyword(name: &str, version: &str) -> String {
    let mut base = name;
    if let Some((head, arch)) = base.rsplit_once(':') {
        if !arch.is_empty() && arch.chars().all(|c| c.is_ascii_alphanumeric()) {
            base = head;
        }
    }
    for prefix in ["python3-", "python-", "lib"] {
        if let Some(rest) = base.strip_prefix(prefix) {
            if !rest.is_empty() {
                base = rest;
                break;
            }
        }
    }
    for suffix in ["-dev", "-bin", "-common", "-doc", "-data"] {
        if let Some(rest) = base.strip_suffix(suffix) {
            if !rest.is_empty() {
                base = rest;
                break;
            }
        }
    }

    let base = base.trim().to_lowercase();
    let version = normalize_version(version);
    if version.is_empty() {
        base
    } else {
        format!("{} {}", base, version)
    }
}

#[derive(Deserialize)]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdItem>,
}

#[derive(Deserialize)]
struct NvdItem {
    cve: NvdCve,
}

#[derive(Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    descriptions: Vec<NvdDescription>,
    #[serde(default)]
    metrics: NvdMetrics,
}

#[derive(Deserialize)]
struct NvdDescription {
    lang: String,
    value: String,
}

#[derive(Default, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    v31: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    v30: Vec<CvssMetric>,
    #[serde(rename = "cvssMetricV2", default)]
    v2: Vec<CvssMetric>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssMetric {
    cvss_data: CvssData,
    /// Set at this level by CVSS v2 entries.
    base_severity: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssData {
    base_score: f64,
    base_severity: Option<String>,
}

/// Preference order: CVSS v3.1, v3.0, then v2.
fn severity_and_score(metrics: &NvdMetrics) -> (Severity, f64) {
    let metric = metrics
        .v31
        .first()
        .or_else(|| metrics.v30.first())
        .or_else(|| metrics.v2.first());

    let Some(metric) = metric else {
        return (Severity::Unknown, 0.0);
    };

    let score = metric.cvss_data.base_score;
    let named = metric
        .cvss_data
        .base_severity
        .as_deref()
        .or(metric.base_severity.as_deref())
        .and_then(|s| s.parse::<Severity>().ok())
        .unwrap_or(Severity::Unknown);

    let severity = if named == Severity::Unknown {
        Severity::from_score(score)
    } else {
        named
    };
    (severity, score)
}

fn vulns_from_response(response: NvdResponse) -> Vec<VulnRecord> {
    response
        .vulnerabilities
        .into_iter()
        .take(MAX_RESULTS)
        .map(|item| {
            let cve = item.cve;
            let (severity, score) = severity_and_score(&cve.metrics);
            let description = cve
                .descriptions
                .into_iter()
                .find(|d| d.lang == "en")
                .map(|d| truncate(&d.value, MAX_DESCRIPTION_CHARS));

            let mut vuln = VulnRecord::new(cve.id, severity, score);
            vuln.description = description;
            vuln
        })
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::VulnerabilityChecker;

    const RESPONSE: &str = r#"{
        "resultsPerPage": 3,
        "totalResults": 3,
        "vulnerabilities": [
            {"cve": {
                "id": "CVE-2021-23017",
                "descriptions": [
                    {"lang": "es", "value": "Una vulnerabilidad"},
                    {"lang": "en", "value": "A security issue in nginx resolver"}
                ],
                "metrics": {
                    "cvssMetricV31": [{"cvssData": {"baseScore": 7.7, "baseSeverity": "HIGH"}}],
                    "cvssMetricV2": [{"cvssData": {"baseScore": 6.8}, "baseSeverity": "MEDIUM"}]
                }
            }},
            {"cve": {
                "id": "CVE-2009-3896",
                "descriptions": [],
                "metrics": {
                    "cvssMetricV2": [{"cvssData": {"baseScore": 5.0}, "baseSeverity": "MEDIUM"}]
                }
            }},
            {"cve": {"id": "CVE-2024-0001", "metrics": {}}}
        ]
    }"#;

    #[test]
    fn parses_nvd_response() {
        let response: NvdResponse = serde_json::from_str(RESPONSE).unwrap();
        let vulns = vulns_from_response(response);
        assert_eq!(vulns.len(), 3);

        assert_eq!(vulns[0].id, "CVE-2021-23017");
        assert_eq!(vulns[0].severity, Severity::High);
        assert_eq!(vulns[0].score, 7.7);
        assert_eq!(
            vulns[0].description.as_deref(),
            Some("A security issue in nginx resolver")
        );

        assert_eq!(vulns[1].severity, Severity::Medium);
        assert!(vulns[1].description.is_none());

        assert_eq!(vulns[2].severity, Severity::Unknown);
        assert_eq!(vulns[2].score, 0.0);
    }

    #[test]
    fn severity_falls_back_to_score() {
        let metrics: NvdMetrics = serde_json::from_str(
            r#"{"cvssMetricV30": [{"cvssData": {"baseScore": 9.8}}]}"#,
        )
        .unwrap();
        assert_eq!(severity_and_score(&metrics), (Severity::Critical, 9.8));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let text = "x".repeat(250);
        let cut = truncate(&text, MAX_DESCRIPTION_CHARS);
        assert_eq!(cut.len(), MAX_DESCRIPTION_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn keywords() {
        assert_eq!(search_keyword("systemd", "245.4-4ubuntu3.21"), "systemd 245.4");
        assert_eq!(search_keyword("python3-yaml", "5.3.1-1"), "yaml 5.3.1");
        assert_eq!(search_keyword("zlib1g-dev", "1:1.2.11.dfsg-2"), "zlib1g 1.2.11");
        assert_eq!(search_keyword("lib", ""), "lib");
    }

    #[tokio::test]
    async fn cached_lookups_skip_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path(), Duration::from_secs(3600));
        cache
            .set(
                "nvd_nginx_1.18.0-6",
                &vec![VulnRecord::new("CVE-2021-23017", Severity::High, 7.7)],
            )
            .unwrap();

        let checker = NvdChecker::new(None)
            .with_base_url("http://127.0.0.1:9/unreachable")
            .with_cache(cache)
            .with_request_delay(Duration::ZERO);

        let found = checker
            .check(&[("nginx".to_string(), "1.18.0-6".to_string())])
            .await
            .unwrap();
        assert_eq!(found["nginx"].len(), 1);
    }

    #[tokio::test]
    async fn unreachable_service_yields_empty_lists() {
        let checker = NvdChecker::new(None)
            .with_base_url("http://127.0.0.1:9/unreachable")
            .with_request_delay(Duration::ZERO)
            .with_options(CheckerOptions {
                concurrency: 2,
                retries: 1,
                backoff: Duration::from_millis(1),
            });

        let found = checker
            .check(&[
                ("zlib".to_string(), "1.2.13".to_string()),
                ("bash".to_string(), "5.2".to_string()),
            ])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.values().all(Vec::is_empty));
    }
}
