use std::path::Path;

use tracing::{debug, warn};

use super::PackageManagerBackend;
use crate::error::ScanError;
use crate::model::{FileRecord, PackageManager, PackageRecord};
use crate::volume;

const LOCAL_DB: &str = "var/lib/pacman/local";

/// Pacman local database reader (Arch Linux and derivatives).
pub struct PacmanBackend;

impl PackageManagerBackend for PacmanBackend {
    fn name(&self) -> &'static str {
        "pacman"
    }

    fn kind(&self) -> PackageManager {
        PackageManager::Pacman
    }

    fn detect(&self, root: &Path) -> bool {
        volume::is_dir(root, LOCAL_DB)
    }

    fn enumerate_packages(&self, root: &Path) -> Result<Vec<PackageRecord>, ScanError> {
        let db = volume::host_path(root, LOCAL_DB);
        std::fs::read_dir(&db).map_err(|e| ScanError::io(&db, e))?;

        let mut packages = Vec::new();
        for (entry_name, entry_path) in volume::list_dir(root, LOCAL_DB) {
            // ALPM_DB_VERSION and friends are plain files.
            if !entry_path.is_dir() {
                continue;
            }

            let desc_path = entry_path.join("desc");
            let desc = match volume::read_lossy(&desc_path) {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(path = %desc_path.display(), error = %e, "skipping pacman entry without desc");
                    continue;
                }
            };

            let Some((name, version)) = parse_desc(&desc) else {
                let error = ScanError::DatabaseCorruption {
                    path: desc_path,
                    reason: "desc has no %NAME% or %VERSION% value".to_string(),
                };
                warn!(entry = %entry_name, error = %error, "skipped package record");
                continue;
            };

            let mut package = PackageRecord::new(name, version, PackageManager::Pacman);
            match volume::read_lossy(&entry_path.join("files")) {
                Ok(files) => package
                    .files
                    .extend(parse_files(&files).into_iter().map(FileRecord::new)),
                Err(e) => debug!(entry = %entry_name, error = %e, "no pacman files list"),
            }
            packages.push(package);
        }

        debug!(count = packages.len(), "enumerated pacman packages");
        Ok(packages)
    }
}

/// Values of a `%SECTION%` block in a desc or files document.
fn section<'a>(content: &'a str, header: &'a str) -> impl Iterator<Item = &'a str> {
    content
        .lines()
        .skip_while(move |line| line.trim() != header)
        .skip(1)
        .map(str::trim)
        .take_while(|line| !line.is_empty() && !(line.starts_with('%') && line.ends_with('%')))
}

/// Extracts `%NAME%` and `%VERSION%` from a desc document.
pub(crate) fn parse_desc(content: &str) -> Option<(String, String)> {
    let name = section(content, "%NAME%").next()?.to_string();
    let version = section(content, "%VERSION%").next()?.to_string();
    Some((name, version))
}

/// Regular files from the `%FILES%` section; directory entries end in `/`
/// and are dropped.
pub(crate) fn parse_files(content: &str) -> Vec<String> {
    section(content, "%FILES%")
        .filter(|entry| !entry.ends_with('/'))
        .map(|entry| format!("/{}", entry.trim_start_matches('/')))
        .collect()
}
