//! Exact path-to-package ownership matching.
//!
//! Ownership is decided by full-path equality after normalization, never by
//! substring: `/usr/bin/foo` is not owned by a package shipping
//! `/usr/bin/foobar`. Every owner is reported, so co-owned paths stay
//! visible instead of being collapsed to one winner.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::error::ScanError;
use crate::model::PackageRecord;

/// Reverse lookup provided by package databases that cannot hand out full
/// file manifests cheaply.
pub trait OwnerIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Names of all packages owning `path` (a canonical volume path).
    fn owners_of(&self, path: &str) -> Result<Vec<String>, ScanError>;
}

/// Normalizes a manifest or query path to the key used for matching:
/// no leading `./` or `/`, no empty or `.` components, no trailing slash.
pub fn normalize_manifest_path(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Default)]
pub struct OwnershipMatcher {
    by_path: HashMap<String, BTreeSet<String>>,
    indexes: Vec<Box<dyn OwnerIndex>>,
}

impl OwnershipMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packages<'a>(packages: impl IntoIterator<Item = &'a PackageRecord>) -> Self {
        let mut matcher = Self::new();
        for package in packages {
            matcher.add_manifest(package);
        }
        matcher
    }

    /// Indexes every file of `package`.
    pub fn add_manifest(&mut self, package: &PackageRecord) {
        for file in &package.files {
            let key = normalize_manifest_path(&file.path);
            if key.is_empty() {
                continue;
            }
            self.by_path
                .entry(key)
                .or_default()
                .insert(package.name.clone());
        }
    }

    pub fn add_index(&mut self, index: Box<dyn OwnerIndex>) {
        self.indexes.push(index);
    }

    pub fn indexed_paths(&self) -> usize {
        self.by_path.len()
    }

    /// All packages owning any of `paths`. Index failures are logged and
    /// treated as "no owner" for that path.
    pub fn owners<'a, I>(&self, paths: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut owners = BTreeSet::new();

        for path in paths {
            let key = normalize_manifest_path(path);
            if key.is_empty() {
                continue;
            }

            if let Some(found) = self.by_path.get(&key) {
                owners.extend(found.iter().cloned());
            }

            let query = format!("/{}", key);
            for index in &self.indexes {
                match index.owners_of(&query) {
                    Ok(found) => owners.extend(found),
                    Err(e) => {
                        warn!(index = index.name(), path = %query, error = %e, "owner lookup failed");
                    }
                }
            }
        }

        if owners.len() > 1 {
            debug!(owners = ?owners, "path has multiple owners");
        }
        owners
    }
}
