//! Read-only helpers for working inside a scanned volume.
//!
//! Paths inside the volume are written the way the target system sees them
//! (`/usr/sbin/nginx`) and joined under the volume root only when touching
//! the host filesystem. Probes never fail: an I/O error reads as "absent".

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Joins a volume-relative path (with or without a leading `/`) under `root`.
pub fn host_path(root: &Path, volume_path: &str) -> PathBuf {
    root.join(volume_path.trim_start_matches('/'))
}

pub fn exists(root: &Path, volume_path: &str) -> bool {
    fs::symlink_metadata(host_path(root, volume_path)).is_ok()
}

pub fn is_dir(root: &Path, volume_path: &str) -> bool {
    host_path(root, volume_path).is_dir()
}

pub fn is_file(root: &Path, volume_path: &str) -> bool {
    host_path(root, volume_path).is_file()
}

/// Converts a host path below `root` back into a volume path.
pub fn to_volume_path(root: &Path, host: &Path) -> String {
    let rel = host.strip_prefix(root).unwrap_or(host);
    let joined = rel
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

/// Direct children of a volume directory, sorted by name. Missing or
/// unreadable directories yield an empty list.
pub fn list_dir(root: &Path, volume_path: &str) -> Vec<(String, PathBuf)> {
    let dir = host_path(root, volume_path);
    if !dir.is_dir() {
        return Vec::new();
    }

    WalkDir::new(&dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (name, entry.into_path())
        })
        .collect()
}

/// Reads a text file, replacing invalid UTF-8 instead of failing on it.
pub fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_strips_leading_slash() {
        let root = Path::new("/mnt/image");
        assert_eq!(
            host_path(root, "/usr/bin/foo"),
            PathBuf::from("/mnt/image/usr/bin/foo")
        );
        assert_eq!(
            host_path(root, "usr/bin/foo"),
            PathBuf::from("/mnt/image/usr/bin/foo")
        );
    }

    #[test]
    fn to_volume_path_round_trips() {
        let root = Path::new("/mnt/image");
        assert_eq!(
            to_volume_path(root, Path::new("/mnt/image/etc/init.d/cron")),
            "/etc/init.d/cron"
        );
        assert_eq!(to_volume_path(root, root), "/");
    }

    #[test]
    fn list_dir_sorted_and_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc/init.d")).unwrap();
        fs::write(dir.path().join("etc/init.d/ssh"), "").unwrap();
        fs::write(dir.path().join("etc/init.d/cron"), "").unwrap();

        let names: Vec<String> = list_dir(dir.path(), "/etc/init.d")
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["cron", "ssh"]);
        assert!(list_dir(dir.path(), "/etc/missing").is_empty());
    }
}
