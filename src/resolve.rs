//! Canonicalization of executable paths inside a volume.
//!
//! [`PathResolver`] turns a raw token taken from a unit file or init script
//! into the path the target system would actually execute. Every component
//! is checked for symlinks, so merged-`/usr` layouts (`/bin -> usr/bin`) and
//! alternatives chains (`/usr/bin/editor -> /etc/alternatives/editor -> ...`)
//! resolve the same way they would on the booted system, but always inside
//! the volume root.
//!
//! # Example
//!
//! ```no_run
//! use bootsbom::resolve::PathResolver;
//!
//! let resolver = PathResolver::new("/mnt/image");
//! let resolved = resolver.resolve("/usr/sbin/nginx")?;
//! println!("{} (on disk: {})", resolved.path, resolved.verified);
//! # Ok::<(), bootsbom::ScanError>(())
//! ```

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ScanError;

/// Maximum number of symlinks followed while resolving one path.
pub const MAX_SYMLINK_HOPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical, volume-relative absolute path.
    pub path: String,
    /// False when nothing exists at `path` on the volume.
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    max_hops: usize,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_hops: MAX_SYMLINK_HOPS,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `raw` to its canonical volume path.
    ///
    /// A `raw` that already carries the volume root as prefix is used as is;
    /// anything else is taken relative to the volume root.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::PathUnresolvable`] when more than
    /// [`MAX_SYMLINK_HOPS`] links are met.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, ScanError> {
        let relative = self.strip_root(raw);

        let mut pending: VecDeque<String> = split(&relative).collect();
        let mut resolved: Vec<String> = Vec::new();
        let mut hops = 0;
        let mut missing = false;

        while let Some(component) = pending.pop_front() {
            match component.as_str() {
                "" | "." => continue,
                ".." => {
                    resolved.pop();
                    continue;
                }
                _ => {}
            }

            if missing {
                resolved.push(component);
                continue;
            }

            let host = self.host_path(&resolved).join(&component);
            match fs::symlink_metadata(&host) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    hops += 1;
                    if hops > self.max_hops {
                        return Err(ScanError::PathUnresolvable {
                            path: raw.to_string(),
                            reason: format!("more than {} symlink hops", self.max_hops),
                        });
                    }

                    let target = match fs::read_link(&host) {
                        Ok(target) => target.to_string_lossy().into_owned(),
                        Err(e) => {
                            debug!(path = %host.display(), error = %e, "unreadable symlink");
                            missing = true;
                            resolved.push(component);
                            continue;
                        }
                    };

                    // Absolute targets are re-rooted, relative ones stay in
                    // the link's directory.
                    if target.starts_with('/') {
                        resolved.clear();
                    }
                    for part in split(&target).rev() {
                        pending.push_front(part);
                    }
                }
                Ok(_) => resolved.push(component),
                Err(_) => {
                    missing = true;
                    resolved.push(component);
                }
            }
        }

        Ok(ResolvedPath {
            path: format!("/{}", resolved.join("/")),
            verified: !missing,
        })
    }

    fn strip_root(&self, raw: &str) -> String {
        match Path::new(raw).strip_prefix(&self.root) {
            Ok(rest) if self.root != Path::new("/") && self.root != Path::new("") => {
                rest.to_string_lossy().into_owned()
            }
            _ => raw.to_string(),
        }
    }

    fn host_path(&self, components: &[String]) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(components);
        path
    }
}

fn split(path: &str) -> impl DoubleEndedIterator<Item = String> + '_ {
    path.split('/').map(str::to_string)
}

/// Lexically normalizes a path without touching the filesystem:
/// `/usr/./bin//../sbin/foo` becomes `/usr/sbin/foo`.
pub fn lexical_normalize(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Convenience wrapper around [`PathResolver::resolve`].
pub fn resolve(volume_root: &Path, raw: &str) -> Result<ResolvedPath, ScanError> {
    PathResolver::new(volume_root).resolve(raw)
}
