use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::{VulnRecord, UNKNOWN_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Rpm,
    Pacman,
    Apk,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Rpm => "rpm",
            PackageManager::Pacman => "pacman",
            PackageManager::Apk => "apk",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "APT/dpkg",
            PackageManager::Rpm => "RPM",
            PackageManager::Pacman => "Pacman",
            PackageManager::Apk => "APK",
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A file owned by a package, keyed by its canonical path.
///
/// Two records with the same path compare equal regardless of the
/// `unverified` flag, so a set of `FileRecord`s never holds a path twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    /// Set when the path was resolved but nothing exists there on disk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unverified: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            unverified: false,
        }
    }

    pub fn unverified(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            unverified: true,
        }
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileRecord {}

impl PartialOrd for FileRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<PackageManager>,
    #[serde(default)]
    pub files: BTreeSet<FileRecord>,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnRecord>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>, manager: PackageManager) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            manager: Some(manager),
            files: BTreeSet::new(),
            vulnerabilities: Vec::new(),
        }
    }

    /// A record for a package known only by name, e.g. an owner reported by
    /// a reverse index for a package that was never enumerated.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: UNKNOWN_VERSION.to_string(),
            manager: None,
            files: BTreeSet::new(),
            vulnerabilities: Vec::new(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(FileRecord::new));
        self
    }

    pub fn has_known_version(&self) -> bool {
        is_known_version(&self.version)
    }
}

/// Returns false for empty and placeholder versions.
pub fn is_known_version(version: &str) -> bool {
    !version.is_empty() && version != UNKNOWN_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_set_ignores_unverified_flag_for_identity() {
        let mut files = BTreeSet::new();
        files.insert(FileRecord::new("/usr/bin/foo"));
        files.insert(FileRecord::unverified("/usr/bin/foo"));
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn with_files_deduplicates() {
        let pkg = PackageRecord::new("coreutils", "9.1-1", PackageManager::Apt)
            .with_files(["/bin/ls", "/bin/cat", "/bin/ls"]);
        assert_eq!(pkg.files.len(), 2);
    }

    #[test]
    fn placeholder_has_unknown_version() {
        let pkg = PackageRecord::placeholder("glibc");
        assert!(!pkg.has_known_version());
        assert!(pkg.manager.is_none());
    }

    #[test]
    fn unverified_flag_skipped_when_false() {
        let json = serde_json::to_string(&FileRecord::new("/usr/bin/foo")).unwrap();
        assert_eq!(json, r#"{"path":"/usr/bin/foo"}"#);
        let json = serde_json::to_string(&FileRecord::unverified("/usr/bin/foo")).unwrap();
        assert!(json.contains(r#""unverified":true"#));
    }
}
