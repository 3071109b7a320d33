use std::path::Path;

use tracing::debug;

use super::{log_skipped_records, PackageManagerBackend};
use crate::error::ScanError;
use crate::model::{FileRecord, PackageManager, PackageRecord, UNKNOWN_VERSION};
use crate::volume;

const INSTALLED_DB: &str = "lib/apk/db/installed";

/// Alpine apk database reader.
pub struct ApkBackend;

impl PackageManagerBackend for ApkBackend {
    fn name(&self) -> &'static str {
        "apk"
    }

    fn kind(&self) -> PackageManager {
        PackageManager::Apk
    }

    fn detect(&self, root: &Path) -> bool {
        volume::is_file(root, INSTALLED_DB)
    }

    fn enumerate_packages(&self, root: &Path) -> Result<Vec<PackageRecord>, ScanError> {
        let db = volume::host_path(root, INSTALLED_DB);
        let content = volume::read_lossy(&db).map_err(|e| ScanError::io(&db, e))?;

        let (packages, skipped) = parse_installed(&content);
        log_skipped_records(&db, skipped);
        debug!(count = packages.len(), "enumerated apk packages");
        Ok(packages)
    }
}

/// Parses the apk `installed` database.
///
/// `P:` names the package, `V:` its version. Files come from `F:` (directory)
/// followed by `R:` (file name) lines. Older databases list owned paths
/// directly on `o:` lines; an `o:` value without a `/` is an origin package
/// name and is ignored. Stanzas without a `P:` line are skipped and their
/// reasons returned.
pub(crate) fn parse_installed(content: &str) -> (Vec<PackageRecord>, Vec<String>) {
    let mut packages = Vec::new();
    let mut skipped = Vec::new();

    for (index, stanza) in content.split("\n\n").enumerate() {
        if stanza.trim().is_empty() {
            continue;
        }

        let mut name = None;
        let mut version = None;
        let mut files = Vec::new();
        let mut dir = String::new();

        for line in stanza.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "P" => name = Some(value.to_string()),
                "V" => version = Some(value.to_string()),
                "F" => dir = value.trim_matches('/').to_string(),
                "R" if dir.is_empty() => files.push(format!("/{}", value)),
                "R" => files.push(format!("/{}/{}", dir, value)),
                "o" if value.contains('/') => {
                    files.push(format!("/{}", value.trim_start_matches('/')))
                }
                _ => {}
            }
        }

        let Some(name) = name.filter(|n| !n.is_empty()) else {
            skipped.push(format!("stanza {}: no P: line", index + 1));
            continue;
        };
        let version = version.unwrap_or_else(|| UNKNOWN_VERSION.to_string());

        let mut package = PackageRecord::new(name, version, PackageManager::Apk);
        package.files.extend(files.into_iter().map(FileRecord::new));
        packages.push(package);
    }

    (packages, skipped)
}
