//! Error types for the scan engine.
//!
//! Only [`ScanError::VolumeUnreadable`] and [`ScanError::NoBackend`] abort a
//! scan. Every other variant is logged by the stage that produced it and the
//! scan continues with whatever data it has.
//!
//! Ambiguous ownership and orphan services are not errors: they are recorded
//! in the graph itself.

use std::path::PathBuf;

/// Errors raised while scanning a volume.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The volume root does not exist or cannot be listed.
    #[error("volume root is unreadable: {path}: {reason}")]
    VolumeUnreadable { path: PathBuf, reason: String },

    /// None of the registered package managers or init systems matched.
    #[error("no supported {kind} detected under {root}")]
    NoBackend { kind: &'static str, root: PathBuf },

    /// A backend probe failed in a way worth reporting.
    #[error("detection failed for {backend}: {reason}")]
    DetectionFailure { backend: &'static str, reason: String },

    /// A package database or record could not be parsed.
    #[error("corrupt package database: {path}: {reason}")]
    DatabaseCorruption { path: PathBuf, reason: String },

    /// A path could not be resolved inside the volume.
    #[error("cannot resolve '{path}': {reason}")]
    PathUnresolvable { path: String, reason: String },

    /// A vulnerability lookup failed.
    #[error("vulnerability lookup failed for {package}: {reason}")]
    Enrichment { package: String, reason: String },

    /// An external helper command failed.
    #[error("command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    /// File I/O error.
    #[error("io error: {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error must abort the whole scan.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::VolumeUnreadable { .. } | ScanError::NoBackend { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_corruption_display() {
        let err = ScanError::DatabaseCorruption {
            path: PathBuf::from("/mnt/var/lib/dpkg/status"),
            reason: "stanza without Package field".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dpkg/status"));
        assert!(msg.contains("stanza without Package field"));
    }

    #[test]
    fn path_unresolvable_display() {
        let err = ScanError::PathUnresolvable {
            path: "/usr/bin/loop".to_owned(),
            reason: "more than 8 symlink hops".to_owned(),
        };
        assert!(err.to_string().contains("/usr/bin/loop"));
    }

    #[test]
    fn only_volume_and_backend_errors_are_fatal() {
        let fatal = ScanError::NoBackend {
            kind: "package manager",
            root: PathBuf::from("/mnt"),
        };
        assert!(fatal.is_fatal());

        let unreadable = ScanError::VolumeUnreadable {
            path: PathBuf::from("/mnt"),
            reason: "not a directory".to_owned(),
        };
        assert!(unreadable.is_fatal());

        let soft = ScanError::Enrichment {
            package: "openssl".to_owned(),
            reason: "timeout".to_owned(),
        };
        assert!(!soft.is_fatal());

        let io = ScanError::io(
            "/mnt/etc/init.d",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!io.is_fatal());
        assert!(io.to_string().contains("init.d"));
    }
}
