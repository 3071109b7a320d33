//! # bootsbom
//!
//! Inventories the packages and boot-time services of an operating-system
//! filesystem image and links every service to the package that owns the
//! executable it launches. The result is a graph that can be rendered as
//! JSON or as a CycloneDX SBOM, optionally enriched with known
//! vulnerabilities.
//!
//! ## Supported Backends
//!
//! | Package managers | Init systems |
//! |------------------|--------------|
//! | APT/dpkg, RPM, Pacman, APK | systemd, SysV init, OpenRC |
//!
//! ## Example
//!
//! ```no_run
//! use bootsbom::{ScanOptions, ScanPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut options = ScanOptions::new("/mnt/image");
//!     options.startup_only = true;
//!
//!     let graph = ScanPipeline::new(options)?.run().await?;
//!     for service in &graph.services {
//!         println!(
//!             "{} -> {}",
//!             service.name,
//!             service.associated_package.as_deref().unwrap_or("(orphan)")
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Errors that only affect part of a scan are logged and skipped:
//!
//! ```
//! use bootsbom::ScanError;
//!
//! let err = ScanError::PathUnresolvable {
//!     path: "/usr/bin/loop".into(),
//!     reason: "too many symlink hops".into(),
//! };
//! assert!(!err.is_fatal());
//! ```

pub mod aggregate;
pub mod boot_timing;
pub mod cache;
pub mod checker;
pub mod config;
pub mod distro;
pub mod error;
pub mod init;
pub mod logging;
pub mod manager;
pub mod model;
pub mod output;
pub mod ownership;
pub mod pipeline;
pub mod resolve;
pub mod volume;

pub use cache::Cache;
pub use config::Config;
pub use error::ScanError;
pub use model::{
    FileRecord, InitSystem, PackageManager, PackageRecord, ScanGraph, ScanMetadata,
    ServiceRecord, ServiceStatus, Severity, VulnRecord,
};
pub use pipeline::{enrich, ScanOptions, ScanPipeline};
