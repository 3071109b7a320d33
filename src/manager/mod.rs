//! Package manager backends.
//!
//! This module provides the [`PackageManagerBackend`] trait and one
//! implementation per supported package database. Backends read the
//! database of a mounted volume; none of them touch the host's own
//! packages.
//!
//! # Available Backends
//!
//! | Backend | Database | Detected by |
//! |---------|----------|-------------|
//! | [`AptBackend`] | dpkg status + `info/*.list` | `/var/lib/dpkg/status` |
//! | [`RpmBackend`] | rpmdb via the `rpm` CLI | `/var/lib/rpm`, `/usr/lib/sysimage/rpm` |
//! | [`PacmanBackend`] | `local/<pkg>/{desc,files}` | `/var/lib/pacman/local` |
//! | [`ApkBackend`] | `installed` stanzas | `/lib/apk/db/installed` |
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use bootsbom::manager::detect_managers;
//!
//! let root = Path::new("/mnt/image");
//! for backend in detect_managers(root) {
//!     let packages = backend.enumerate_packages(root)?;
//!     println!("{}: {} packages", backend.name(), packages.len());
//! }
//! # Ok::<(), bootsbom::ScanError>(())
//! ```

use tracing::warn;

mod apk;
mod apt;
mod pacman;
mod rpm;

pub use apk::ApkBackend;
pub use apt::AptBackend;
pub use pacman::PacmanBackend;
pub use rpm::{RpmBackend, RpmOwnerIndex};

use std::path::Path;

use crate::error::ScanError;
use crate::model::{PackageManager, PackageRecord};
use crate::ownership::OwnerIndex;

/// A package database reader for one package manager.
pub trait PackageManagerBackend: Send + Sync {
    /// Returns the human-readable name of this backend.
    fn name(&self) -> &'static str;

    fn kind(&self) -> PackageManager;

    /// Returns true if this backend's database is present under `root`.
    fn detect(&self, root: &Path) -> bool;

    /// Lists installed packages with their file manifests.
    ///
    /// Malformed records are skipped with a warning. An unreadable database
    /// is an error.
    fn enumerate_packages(&self, root: &Path) -> Result<Vec<PackageRecord>, ScanError>;

    /// A reverse path-to-owner lookup for databases whose manifests are
    /// not enumerated in full.
    fn owner_index(&self, _root: &Path) -> Option<Box<dyn OwnerIndex>> {
        None
    }
}

type Factory = fn() -> Box<dyn PackageManagerBackend>;

/// Registered backends, in probe order.
const REGISTRY: &[(PackageManager, Factory)] = &[
    (PackageManager::Apt, apt),
    (PackageManager::Rpm, rpm),
    (PackageManager::Pacman, pacman),
    (PackageManager::Apk, apk),
];

fn apt() -> Box<dyn PackageManagerBackend> {
    Box::new(AptBackend)
}

fn rpm() -> Box<dyn PackageManagerBackend> {
    Box::new(RpmBackend::default())
}

fn pacman() -> Box<dyn PackageManagerBackend> {
    Box::new(PacmanBackend)
}

fn apk() -> Box<dyn PackageManagerBackend> {
    Box::new(ApkBackend)
}

/// Returns every registered backend, in probe order.
///
/// ```
/// use bootsbom::manager::all_managers;
///
/// assert_eq!(all_managers().len(), 4);
/// ```
pub fn all_managers() -> Vec<Box<dyn PackageManagerBackend>> {
    REGISTRY.iter().map(|(_, factory)| factory()).collect()
}

/// Returns the backend for a specific package manager.
///
/// ```
/// use bootsbom::{PackageManager, manager::get_manager};
///
/// let backend = get_manager(PackageManager::Pacman).unwrap();
/// assert_eq!(backend.name(), "pacman");
/// ```
pub fn get_manager(kind: PackageManager) -> Option<Box<dyn PackageManagerBackend>> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == kind)
        .map(|(_, factory)| factory())
}

/// Backends whose database exists under `root`. A volume may carry more
/// than one.
pub fn detect_managers(root: &Path) -> Vec<Box<dyn PackageManagerBackend>> {
    all_managers()
        .into_iter()
        .filter(|backend| backend.detect(root))
        .collect()
}

/// Logs every record a database parser skipped, one corruption error each.
pub(crate) fn log_skipped_records(path: &Path, skipped: Vec<String>) {
    for reason in skipped {
        let error = ScanError::DatabaseCorruption {
            path: path.to_path_buf(),
            reason,
        };
        warn!(error = %error, "skipped package record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn registry_covers_every_kind() {
        for backend in all_managers() {
            let found = get_manager(backend.kind()).unwrap();
            assert_eq!(found.name(), backend.name());
        }
    }

    #[test]
    fn detects_multiple_databases() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("var/lib/dpkg")).unwrap();
        fs::write(dir.path().join("var/lib/dpkg/status"), "").unwrap();
        fs::create_dir_all(dir.path().join("lib/apk/db")).unwrap();
        fs::write(dir.path().join("lib/apk/db/installed"), "").unwrap();

        let kinds: Vec<PackageManager> = detect_managers(dir.path())
            .iter()
            .map(|b| b.kind())
            .collect();
        assert_eq!(kinds, [PackageManager::Apt, PackageManager::Apk]);
    }

    #[test]
    fn empty_volume_detects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_managers(dir.path()).is_empty());
    }
}
