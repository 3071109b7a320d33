//! Distribution detection for purl namespaces.
//!
//! Reads the scanned volume's `os-release`, never the host's.

use std::path::Path;

use tracing::debug;

use crate::volume;

const OS_RELEASE: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// Marker files checked when no os-release is present.
const MARKERS: &[(&str, &str)] = &[
    ("etc/debian_version", "debian"),
    ("etc/redhat-release", "redhat"),
    ("etc/arch-release", "arch"),
    ("etc/alpine-release", "alpine"),
];

/// Fields of interest from an os-release file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    pub pretty_name: Option<String>,
}

pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key {
            "ID" => release.id = Some(value.to_lowercase()),
            "ID_LIKE" => {
                release.id_like = value.split_whitespace().map(str::to_lowercase).collect()
            }
            "VERSION_ID" => release.version_id = Some(value.to_string()),
            "PRETTY_NAME" => release.pretty_name = Some(value.to_string()),
            _ => {}
        }
    }

    release
}

/// Maps a distribution id onto the purl namespace used for its packages.
fn family(id: &str) -> Option<&'static str> {
    match id {
        "debian" | "ubuntu" | "linuxmint" | "raspbian" | "kali" => Some("debian"),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => Some("redhat"),
        "arch" | "manjaro" | "endeavouros" => Some("arch"),
        "alpine" => Some("alpine"),
        "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" | "suse" => Some("suse"),
        _ => None,
    }
}

impl OsRelease {
    /// `ID` first, then each `ID_LIKE` entry; unrecognized ids give
    /// `"generic"`.
    pub fn namespace(&self) -> String {
        self.id
            .iter()
            .chain(self.id_like.iter())
            .find_map(|id| family(id))
            .unwrap_or("generic")
            .to_string()
    }
}

/// Distribution namespace of the volume at `root`, or `"unknown"`.
pub fn detect_distro(root: &Path) -> String {
    for candidate in OS_RELEASE {
        let path = volume::host_path(root, candidate);
        if let Ok(content) = volume::read_lossy(&path) {
            let release = parse_os_release(&content);
            if release.id.is_some() || !release.id_like.is_empty() {
                let namespace = release.namespace();
                debug!(path = %path.display(), id = ?release.id, namespace = %namespace, "detected distribution");
                return namespace;
            }
        }
    }

    MARKERS
        .iter()
        .find(|(marker, _)| volume::is_file(root, marker))
        .map(|(_, namespace)| namespace.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const UBUNTU: &str = "\
NAME=\"Ubuntu\"
VERSION_ID=\"22.04\"
ID=ubuntu
ID_LIKE=debian
PRETTY_NAME=\"Ubuntu 22.04.3 LTS\"
";

    #[test]
    fn parses_fields() {
        let release = parse_os_release(UBUNTU);
        assert_eq!(release.id.as_deref(), Some("ubuntu"));
        assert_eq!(release.id_like, ["debian"]);
        assert_eq!(release.version_id.as_deref(), Some("22.04"));
        assert_eq!(release.namespace(), "debian");
    }

    #[test]
    fn id_like_is_a_fallback() {
        let release = parse_os_release("ID=\"pop\"\nID_LIKE=\"ubuntu debian\"\n");
        assert_eq!(release.namespace(), "debian");
        assert_eq!(parse_os_release("ID=nixos\n").namespace(), "generic");
        assert_eq!(parse_os_release("ID=rocky\nID_LIKE=\"rhel centos fedora\"\n").namespace(), "redhat");
    }

    #[test]
    fn detects_from_volume_and_markers() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_distro(dir.path()), "unknown");

        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/alpine-release"), "3.19.0\n").unwrap();
        assert_eq!(detect_distro(dir.path()), "alpine");

        fs::write(dir.path().join("etc/os-release"), "ID=arch\n").unwrap();
        assert_eq!(detect_distro(dir.path()), "arch");
    }
}
