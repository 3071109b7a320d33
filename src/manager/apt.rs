use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use super::{log_skipped_records, PackageManagerBackend};
use crate::error::ScanError;
use crate::model::{PackageManager, PackageRecord, UNKNOWN_VERSION};
use crate::volume;

const STATUS_FILE: &str = "var/lib/dpkg/status";
const INFO_DIR: &str = "var/lib/dpkg/info";

/// dpkg database reader (Debian, Ubuntu and derivatives).
pub struct AptBackend;

/// One stanza of the dpkg status file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DpkgEntry {
    pub package: String,
    pub version: Option<String>,
    pub status: Option<String>,
    pub architecture: Option<String>,
}

impl DpkgEntry {
    /// Entries without a Status field are kept; otherwise the last status
    /// word must be `installed`.
    fn is_installed(&self) -> bool {
        match &self.status {
            None => true,
            Some(status) => status.split_whitespace().last() == Some("installed"),
        }
    }
}

impl PackageManagerBackend for AptBackend {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn kind(&self) -> PackageManager {
        PackageManager::Apt
    }

    fn detect(&self, root: &Path) -> bool {
        volume::is_file(root, STATUS_FILE)
    }

    fn enumerate_packages(&self, root: &Path) -> Result<Vec<PackageRecord>, ScanError> {
        let status_path = volume::host_path(root, STATUS_FILE);
        let content =
            volume::read_lossy(&status_path).map_err(|e| ScanError::io(&status_path, e))?;

        let (entries, skipped) = parse_status(&content);
        log_skipped_records(&status_path, skipped);

        let mut packages: BTreeMap<String, PackageRecord> = BTreeMap::new();
        for entry in entries.into_iter().filter(DpkgEntry::is_installed) {
            let files = read_manifest(root, &entry);
            let version = entry.version.as_deref().unwrap_or(UNKNOWN_VERSION);

            // Multi-arch installs list the same name once per architecture.
            packages
                .entry(entry.package.clone())
                .or_insert_with(|| PackageRecord::new(&entry.package, version, PackageManager::Apt))
                .files
                .extend(files.into_iter().map(crate::model::FileRecord::new));
        }

        debug!(count = packages.len(), "enumerated dpkg packages");
        Ok(packages.into_values().collect())
    }
}

fn read_manifest(root: &Path, entry: &DpkgEntry) -> Vec<String> {
    let mut candidates = vec![format!("{}/{}.list", INFO_DIR, entry.package)];
    if let Some(arch) = &entry.architecture {
        candidates.push(format!("{}/{}:{}.list", INFO_DIR, entry.package, arch));
    }

    let mut files = Vec::new();
    let mut found = false;
    for candidate in candidates {
        let path = volume::host_path(root, &candidate);
        match volume::read_lossy(&path) {
            Ok(content) => {
                found = true;
                files.extend(parse_list(&content));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable dpkg file list"),
        }
    }

    if !found {
        debug!(package = %entry.package, "no dpkg file list");
    }
    files
}

/// Parses the dpkg status file into stanzas. Returns the entries and, for
/// each stanza skipped as malformed, the reason.
pub(crate) fn parse_status(content: &str) -> (Vec<DpkgEntry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();

    for (index, stanza) in content.split("\n\n").enumerate() {
        if stanza.trim().is_empty() {
            continue;
        }

        let mut entry = DpkgEntry::default();
        let mut broken = None;

        for line in stanza.lines() {
            if line.is_empty() || line.starts_with(' ') || line.starts_with('\t') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                broken = Some(format!("stanza {}: field line without ':': {:?}", index + 1, line));
                break;
            };
            let value = value.trim().to_string();
            match key {
                "Package" => entry.package = value,
                "Version" => entry.version = Some(value),
                "Status" => entry.status = Some(value),
                "Architecture" => entry.architecture = Some(value),
                _ => {}
            }
        }

        if let Some(reason) = broken {
            skipped.push(reason);
            continue;
        }
        if entry.package.is_empty() {
            skipped.push(format!("stanza {}: no Package field", index + 1));
            continue;
        }
        entries.push(entry);
    }

    (entries, skipped)
}

/// Parses an `info/<pkg>.list` manifest.
pub(crate) fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "/.")
        .map(str::to_string)
        .collect()
}
