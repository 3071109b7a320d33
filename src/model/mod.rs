//! Core data types for packages, services, vulnerabilities and the scan graph.
//!
//! - [`PackageRecord`] - An installed package and the files it owns
//! - [`ServiceRecord`] - A boot-time service and the executables it launches
//! - [`FileRecord`] - A canonical path owned by a package
//! - [`VulnRecord`] - A known vulnerability attached to a package
//! - [`ScanGraph`] - Complete scan output
//!
//! # Example
//!
//! ```
//! use bootsbom::model::{PackageManager, PackageRecord};
//!
//! let package = PackageRecord::new("nginx", "1.18.0-6", PackageManager::Apt)
//!     .with_files(["/usr/sbin/nginx"]);
//! assert_eq!(package.files.len(), 1);
//! ```

mod graph;
mod package;
mod service;
mod vulnerability;

pub use graph::*;
pub use package::*;
pub use service::*;
pub use vulnerability::*;

/// Placeholder used wherever a version could not be determined.
pub const UNKNOWN_VERSION: &str = "unknown";
