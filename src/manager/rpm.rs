use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::PackageManagerBackend;
use crate::error::ScanError;
use crate::model::{PackageManager, PackageRecord};
use crate::ownership::OwnerIndex;
use crate::volume;

const DB_DIRS: &[&str] = &["var/lib/rpm", "usr/lib/sysimage/rpm"];
const QUERY_FORMAT: &str = "%{NAME}\\t%{VERSION}-%{RELEASE}\\n";

/// rpmdb reader (Fedora, RHEL, SUSE and derivatives).
///
/// The database format varies (Berkeley DB, NDB, SQLite) between releases,
/// so queries go through the `rpm` binary pointed at the volume's database
/// with `--dbpath`. Package enumeration skips full manifests; ownership is
/// answered by [`RpmOwnerIndex`] instead.
#[derive(Debug, Clone)]
pub struct RpmBackend {
    binary: String,
}

impl Default for RpmBackend {
    fn default() -> Self {
        Self {
            binary: "rpm".to_string(),
        }
    }
}

impl RpmBackend {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn db_path(&self, root: &Path) -> Option<PathBuf> {
        DB_DIRS
            .iter()
            .find(|dir| volume::is_dir(root, dir))
            .map(|dir| volume::host_path(root, dir))
    }
}

impl PackageManagerBackend for RpmBackend {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn kind(&self) -> PackageManager {
        PackageManager::Rpm
    }

    fn detect(&self, root: &Path) -> bool {
        self.db_path(root).is_some()
    }

    fn enumerate_packages(&self, root: &Path) -> Result<Vec<PackageRecord>, ScanError> {
        let db = self.db_path(root).ok_or_else(|| ScanError::DetectionFailure {
            backend: "rpm",
            reason: format!("no rpm database under {}", root.display()),
        })?;

        let stdout = run_rpm(
            &self.binary,
            &db,
            &["-qa", "--queryformat", QUERY_FORMAT],
        )?;

        let packages: Vec<PackageRecord> = parse_query_output(&stdout)
            .into_iter()
            .map(|(name, version)| PackageRecord::new(name, version, PackageManager::Rpm))
            .collect();
        debug!(count = packages.len(), "enumerated rpm packages");
        Ok(packages)
    }

    fn owner_index(&self, root: &Path) -> Option<Box<dyn OwnerIndex>> {
        let db = self.db_path(root)?;
        Some(Box::new(RpmOwnerIndex {
            binary: self.binary.clone(),
            db,
        }))
    }
}

/// Answers ownership queries with `rpm -qf`, which looks paths up in the
/// database's basenames index.
pub struct RpmOwnerIndex {
    binary: String,
    db: PathBuf,
}

impl OwnerIndex for RpmOwnerIndex {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn owners_of(&self, path: &str) -> Result<Vec<String>, ScanError> {
        let output = Command::new(&self.binary)
            .arg("--dbpath")
            .arg(&self.db)
            .args(["-qf", "--queryformat", "%{NAME}\\n", path])
            .output()
            .map_err(|e| ScanError::Command {
                command: format!("{} -qf", self.binary),
                reason: e.to_string(),
            })?;

        // `rpm -qf` exits non-zero for unowned paths and says so on stdout.
        Ok(parse_owner_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn run_rpm(binary: &str, db: &Path, args: &[&str]) -> Result<String, ScanError> {
    let command = format!("{} --dbpath {} {}", binary, db.display(), args.join(" "));
    let output = Command::new(binary)
        .arg("--dbpath")
        .arg(db)
        .args(args)
        .output()
        .map_err(|e| ScanError::Command {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ScanError::Command {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `NAME\tVERSION-RELEASE` lines, skipping anything malformed.
pub(crate) fn parse_query_output(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, version) = line.split_once('\t')?;
            let (name, version) = (name.trim(), version.trim());
            if name.is_empty() || version.is_empty() {
                return None;
            }
            Some((name.to_string(), version.to_string()))
        })
        .collect()
}

/// Package names from `rpm -qf` output. Diagnostic lines such as
/// "file /x is not owned by any package" contain spaces and are dropped.
pub(crate) fn parse_owner_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(char::is_whitespace))
        .map(str::to_string)
        .collect()
}
