use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Unknown => "UNKNOWN",
        }
    }

    /// Maps a CVSS base score onto a severity band.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = std::convert::Infallible;

    /// Parses NVD-style severity names; anything unrecognized is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" | "MODERATE" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Unknown,
        })
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    pub id: String,
    pub severity: Severity,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VulnRecord {
    pub fn new(id: impl Into<String>, severity: Severity, score: f64) -> Self {
        Self {
            id: id.into(),
            severity,
            score,
            description: None,
        }
    }
}

/// Sorts by severity, then score, both descending.
pub fn sort_by_severity(vulns: &mut [VulnRecord]) {
    vulns.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Unknown);
    }

    #[test]
    fn from_score_bands() {
        assert_eq!(Severity::from_score(9.8), Severity::Critical);
        assert_eq!(Severity::from_score(7.0), Severity::High);
        assert_eq!(Severity::from_score(5.5), Severity::Medium);
        assert_eq!(Severity::from_score(0.1), Severity::Low);
        assert_eq!(Severity::from_score(0.0), Severity::Unknown);
    }

    #[test]
    fn parse_severity_names() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("MODERATE".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("bogus".parse::<Severity>().unwrap(), Severity::Unknown);
    }

    #[test]
    fn sort_severity_then_score() {
        let mut vulns = vec![
            VulnRecord::new("CVE-low", Severity::Low, 3.1),
            VulnRecord::new("CVE-high-a", Severity::High, 7.2),
            VulnRecord::new("CVE-unknown", Severity::Unknown, 0.0),
            VulnRecord::new("CVE-critical", Severity::Critical, 9.1),
            VulnRecord::new("CVE-high-b", Severity::High, 8.8),
        ];
        sort_by_severity(&mut vulns);
        let ids: Vec<&str> = vulns.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(
            ids,
            ["CVE-critical", "CVE-high-b", "CVE-high-a", "CVE-low", "CVE-unknown"]
        );
    }

    #[test]
    fn severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }
}
