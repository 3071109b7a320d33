use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InitSystem, PackageManager, PackageRecord, ServiceRecord, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    pub volume_root: String,
    pub package_managers: Vec<PackageManager>,
    pub init_systems: Vec<InitSystem>,
    /// Distribution id used as the purl namespace.
    pub distro: String,
    pub startup_only: bool,
    pub scanned_at: DateTime<Utc>,
}

impl ScanMetadata {
    pub fn new(volume_root: impl Into<String>) -> Self {
        Self {
            volume_root: volume_root.into(),
            package_managers: Vec::new(),
            init_systems: Vec::new(),
            distro: "unknown".to_string(),
            startup_only: false,
            scanned_at: Utc::now(),
        }
    }
}

/// The package/service graph produced by one scan.
///
/// Every non-null `ServiceRecord::associated_package` names a package in
/// `packages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanGraph {
    pub packages: Vec<PackageRecord>,
    pub services: Vec<ServiceRecord>,
    pub metadata: ScanMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub packages: usize,
    pub services: usize,
    pub orphan_services: usize,
    pub ambiguous_services: usize,
    pub unverified_executables: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

impl ScanSummary {
    pub fn vulnerabilities(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.unknown
    }
}

impl ScanGraph {
    pub fn package(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn orphans(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.services.iter().filter(|s| s.is_orphan())
    }

    /// Services attributed to a package, either as primary owner or co-owner.
    pub fn services_of<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a ServiceRecord> {
        self.services
            .iter()
            .filter(move |s| s.owners.contains(package))
    }

    /// Associations pointing at packages missing from the graph.
    /// Empty for any graph produced by the aggregator.
    pub fn dangling_associations(&self) -> Vec<(&str, &str)> {
        self.services
            .iter()
            .filter_map(|s| {
                let owner = s.associated_package.as_deref()?;
                if self.package(owner).is_none() {
                    Some((s.name.as_str(), owner))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Worst severity across all packages, if any vulnerability is attached.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.packages
            .iter()
            .flat_map(|p| p.vulnerabilities.iter().map(|v| v.severity))
            .max()
    }

    pub fn summary(&self) -> ScanSummary {
        let mut summary = ScanSummary {
            packages: self.packages.len(),
            services: self.services.len(),
            ..ScanSummary::default()
        };

        for service in &self.services {
            if service.is_orphan() {
                summary.orphan_services += 1;
            }
            if service.is_ambiguous() {
                summary.ambiguous_services += 1;
            }
            summary.unverified_executables += service.unverified.len();
        }

        for vuln in self.packages.iter().flat_map(|p| &p.vulnerabilities) {
            match vuln.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Unknown => summary.unknown += 1,
            }
        }

        summary
    }
}
