//! The scan pipeline.
//!
//! Stages run in order: detect backends, enumerate packages, discover
//! services, resolve and match executables, attach boot timings. Work inside
//! a stage runs on blocking worker tasks and funnels into one
//! [`ResultAggregator`]. Vulnerability enrichment ([`enrich`]) runs on the
//! collected aggregator before the graph is finished.
//!
//! # Example
//!
//! ```no_run
//! use bootsbom::pipeline::{ScanOptions, ScanPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = ScanPipeline::new(ScanOptions::new("/mnt/image"))?;
//!     let graph = pipeline.run().await?;
//!     for service in graph.orphans() {
//!         println!("no package owns {}", service.name);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::aggregate::ResultAggregator;
use crate::boot_timing;
use crate::checker::{normalize_version, VulnerabilityChecker};
use crate::config::IgnoreConfig;
use crate::distro;
use crate::error::ScanError;
use crate::init::{detect_init, CompositeInit, InitSystemBackend};
use crate::manager::{detect_managers, PackageManagerBackend};
use crate::model::{InitSystem, PackageManager, ScanGraph, ScanMetadata, ServiceRecord, VulnRecord};
use crate::ownership::OwnershipMatcher;
use crate::resolve::{lexical_normalize, PathResolver};

/// Services handed to one worker task during matching.
const MATCH_CHUNK: usize = 64;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    /// Only services started at boot.
    pub startup_only: bool,
    /// Run stage work on blocking worker tasks.
    pub parallel: bool,
    /// A `systemd-analyze plot` SVG captured from the booted system.
    pub boot_plot: Option<PathBuf>,
}

impl ScanOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            startup_only: false,
            parallel: true,
            boot_plot: None,
        }
    }
}

pub struct ScanPipeline {
    options: ScanOptions,
    managers: Vec<Arc<dyn PackageManagerBackend>>,
    init: Option<Arc<CompositeInit>>,
}

impl ScanPipeline {
    /// Detects backends on the volume.
    ///
    /// # Errors
    ///
    /// [`ScanError::VolumeUnreadable`] if the root cannot be listed and
    /// [`ScanError::NoBackend`] if neither a package database nor an init
    /// system is found.
    pub fn new(options: ScanOptions) -> Result<Self, ScanError> {
        let root = &options.root;
        if let Err(e) = std::fs::read_dir(root) {
            return Err(ScanError::VolumeUnreadable {
                path: root.clone(),
                reason: e.to_string(),
            });
        }

        let managers: Vec<Box<dyn PackageManagerBackend>> = detect_managers(root);
        let init = detect_init(root);

        if managers.is_empty() && init.is_none() {
            return Err(ScanError::NoBackend {
                kind: "package manager or init system",
                root: root.clone(),
            });
        }
        if managers.is_empty() {
            warn!(root = %root.display(), "no package database found, every service will be an orphan");
        }
        if init.is_none() {
            warn!(root = %root.display(), "no init system found, inventory only");
        }

        Ok(Self::with_backends(options, managers, init))
    }

    /// A pipeline over explicit backends, skipping detection.
    pub fn with_backends(
        options: ScanOptions,
        managers: Vec<Box<dyn PackageManagerBackend>>,
        init: Option<CompositeInit>,
    ) -> Self {
        Self {
            options,
            managers: managers.into_iter().map(Arc::from).collect(),
            init: init.map(Arc::new),
        }
    }

    pub fn package_managers(&self) -> Vec<PackageManager> {
        self.managers.iter().map(|m| m.kind()).collect()
    }

    pub fn init_systems(&self) -> Vec<InitSystem> {
        self.init.as_ref().map(|i| i.kinds()).unwrap_or_default()
    }

    /// Runs every scan stage and returns the finished graph.
    pub async fn run(&self) -> Result<ScanGraph, ScanError> {
        let aggregator = self.collect().await?;
        Ok(self.finish(aggregator))
    }

    /// Runs every scan stage, leaving the results open for enrichment.
    pub async fn collect(&self) -> Result<ResultAggregator, ScanError> {
        let aggregator = ResultAggregator::new();

        let matcher = self.enumerate_packages(&aggregator).await;
        let services = self.discover_services().await?;
        info!(
            packages = aggregator.package_count(),
            services = services.len(),
            "inventory collected"
        );

        self.match_services(&aggregator, Arc::new(matcher), services)
            .await?;
        self.attach_boot_timings(&aggregator);
        Ok(aggregator)
    }

    /// Closes the aggregator into a graph stamped with this scan's metadata.
    pub fn finish(&self, aggregator: ResultAggregator) -> ScanGraph {
        let mut metadata = ScanMetadata::new(self.options.root.display().to_string());
        metadata.package_managers = self.package_managers();
        metadata.init_systems = self.init_systems();
        metadata.distro = distro::detect_distro(&self.options.root);
        metadata.startup_only = self.options.startup_only;

        let graph = aggregator.finish(metadata);
        info!(
            packages = graph.packages.len(),
            services = graph.services.len(),
            orphans = graph.orphans().count(),
            "scan complete"
        );
        graph
    }

    async fn enumerate_packages(&self, aggregator: &ResultAggregator) -> OwnershipMatcher {
        let tasks = self.managers.iter().map(|manager| {
            let manager = Arc::clone(manager);
            let root = self.options.root.clone();
            async move {
                let name = manager.name();
                let index = manager.owner_index(&root);
                let worker = Arc::clone(&manager);
                let result = self
                    .blocking(move || worker.enumerate_packages(&root))
                    .await
                    .and_then(|packages| packages);
                (name, index, result)
            }
        });

        let mut matcher = OwnershipMatcher::new();
        for (name, index, result) in join_all(tasks).await {
            if let Some(index) = index {
                matcher.add_index(index);
            }
            match result {
                Ok(packages) => {
                    debug!(backend = name, count = packages.len(), "packages enumerated");
                    for package in packages {
                        matcher.add_manifest(&package);
                        aggregator.merge_package(package);
                    }
                }
                Err(e) => warn!(backend = name, error = %e, "package enumeration failed"),
            }
        }
        debug!(paths = matcher.indexed_paths(), "ownership index built");
        matcher
    }

    async fn discover_services(&self) -> Result<Vec<ServiceRecord>, ScanError> {
        let Some(init) = self.init.clone() else {
            return Ok(Vec::new());
        };
        let root = self.options.root.clone();
        let startup_only = self.options.startup_only;

        self.blocking(move || {
            if startup_only {
                init.get_startup_services(&root)
            } else {
                init.get_all_services(&root)
            }
        })
        .await
    }

    async fn match_services(
        &self,
        aggregator: &ResultAggregator,
        matcher: Arc<OwnershipMatcher>,
        services: Vec<ServiceRecord>,
    ) -> Result<(), ScanError> {
        let resolver = PathResolver::new(&self.options.root);

        let mut chunks: Vec<Vec<ServiceRecord>> = Vec::new();
        let mut rest = services;
        while !rest.is_empty() {
            let tail = rest.split_off(rest.len().min(MATCH_CHUNK));
            chunks.push(rest);
            rest = tail;
        }

        let tasks = chunks.into_iter().map(|chunk| {
            let matcher = Arc::clone(&matcher);
            let resolver = resolver.clone();
            self.blocking(move || {
                chunk
                    .into_iter()
                    .map(|service| link_service(&resolver, &matcher, service))
                    .collect::<Vec<_>>()
            })
        });

        for linked in join_all(tasks).await {
            for (service, owners) in linked? {
                let name = service.name.clone();
                aggregator.merge_service(service);
                aggregator.associate(&name, owners);
            }
        }
        Ok(())
    }

    fn attach_boot_timings(&self, aggregator: &ResultAggregator) {
        let Some(plot) = &self.options.boot_plot else {
            return;
        };

        match boot_timing::load_plot(plot) {
            Ok(times) => {
                let mut matched = 0;
                for (unit, time) in times {
                    let short = unit.trim_end_matches(".service");
                    if aggregator.set_execution_time(&unit, time.clone())
                        || aggregator.set_execution_time(short, time)
                    {
                        matched += 1;
                    }
                }
                debug!(matched, "boot timings attached");
            }
            Err(e) => warn!(path = %plot.display(), error = %e, "boot plot ignored"),
        }
    }

    /// Runs `work` on a blocking worker task, or inline when parallelism is
    /// off.
    async fn blocking<T, F>(&self, work: F) -> Result<T, ScanError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if !self.options.parallel {
            return Ok(work());
        }
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| ScanError::DetectionFailure {
                backend: "worker",
                reason: e.to_string(),
            })
    }
}

/// Resolves a service's raw executable tokens and finds the packages owning
/// them. When no executable is owned, the owners of the definition file are
/// returned instead.
pub(crate) fn link_service(
    resolver: &PathResolver,
    matcher: &OwnershipMatcher,
    mut service: ServiceRecord,
) -> (ServiceRecord, BTreeSet<String>) {
    let raw = std::mem::take(&mut service.executables);
    service.executable_names.clear();

    let mut queries: BTreeSet<String> = BTreeSet::new();
    for token in raw {
        match resolver.resolve(&token) {
            Ok(resolved) => {
                if !resolved.verified && !service.unverified.contains(&resolved.path) {
                    service.unverified.push(resolved.path.clone());
                }
                queries.insert(resolved.path.clone());
                service.add_executable(resolved.path);
            }
            Err(e) => {
                warn!(service = %service.name, token = %token, error = %e, "executable left unresolved");
                if !service.unresolved.contains(&token) {
                    service.unresolved.push(token.clone());
                }
            }
        }
        queries.insert(lexical_normalize(&token));
    }

    let mut owners = matcher.owners(queries.iter().map(String::as_str));
    if owners.is_empty() && !service.path.is_empty() {
        owners = matcher.owners([service.path.as_str()]);
    }
    if owners.len() > 1 {
        debug!(service = %service.name, owners = ?owners, "service has several owners");
    }
    (service, owners)
}

/// Looks up vulnerabilities for every package with a known version and
/// appends them to the collected results. Checkers are queried with the
/// upstream version from [`normalize_version`]. Packages and ids on the
/// ignore lists are skipped. Returns the number of vulnerabilities attached.
pub async fn enrich(
    aggregator: &ResultAggregator,
    checker: &dyn VulnerabilityChecker,
    ignore: &IgnoreConfig,
) -> usize {
    let queries: Vec<(String, String)> = aggregator
        .package_versions()
        .into_iter()
        .filter(|(name, _)| !ignore.should_ignore_package(name))
        .map(|(name, version)| (name, normalize_version(&version)))
        .collect();

    if queries.is_empty() {
        return 0;
    }
    debug!(checker = checker.name(), packages = queries.len(), "checking vulnerabilities");

    let found = match checker.check(&queries).await {
        Ok(found) => found,
        Err(e) => {
            warn!(checker = checker.name(), error = %e, "vulnerability check failed");
            return 0;
        }
    };

    found
        .into_iter()
        .map(|(package, vulns)| {
            let kept: Vec<VulnRecord> = vulns
                .into_iter()
                .filter(|v| !ignore.should_ignore_vulnerability(&v.id))
                .collect();
            aggregator.attach_vulnerabilities(&package, kept).unwrap_or(0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PackageRecord, Severity};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn matcher() -> OwnershipMatcher {
        let nginx = PackageRecord::new("nginx-core", "1.18.0", PackageManager::Apt)
            .with_files(["/usr/sbin/nginx"]);
        let common = PackageRecord::new("nginx-common", "1.18.0", PackageManager::Apt)
            .with_files(["/lib/systemd/system/nginx.service"]);
        OwnershipMatcher::from_packages([&nginx, &common])
    }

    fn unit(name: &str, path: &str, exec: &str) -> ServiceRecord {
        ServiceRecord::new(name, path, InitSystem::Systemd).with_executables([exec])
    }

    #[test]
    fn executables_decide_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());

        let service = unit("nginx.service", "/lib/systemd/system/nginx.service", "/usr/sbin/nginx");
        let (linked, owners) = link_service(&resolver, &matcher(), service);

        assert_eq!(owners, BTreeSet::from(["nginx-core".to_string()]));
        assert_eq!(linked.unverified, ["/usr/sbin/nginx"]);
    }

    #[test]
    fn definition_owner_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());

        let service = unit("nginx.service", "/lib/systemd/system/nginx.service", "/opt/wrapper/start.sh");
        let (linked, owners) = link_service(&resolver, &matcher(), service);

        assert_eq!(owners, BTreeSet::from(["nginx-common".to_string()]));
        assert_eq!(linked.executables, ["/opt/wrapper/start.sh"]);
    }

    #[test]
    fn unowned_service_has_no_owners() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());

        let service = unit("custom.service", "/etc/systemd/system/custom.service", "/usr/local/bin/custom");
        let (linked, owners) = link_service(&resolver, &matcher(), service);
        assert!(owners.is_empty());
        assert_eq!(linked.executable_names, ["custom"]);
    }

    #[cfg(unix)]
    #[test]
    fn looping_executable_is_kept_as_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        std::os::unix::fs::symlink("/usr/bin/b", dir.path().join("usr/bin/a")).unwrap();
        std::os::unix::fs::symlink("/usr/bin/a", dir.path().join("usr/bin/b")).unwrap();
        let resolver = PathResolver::new(dir.path());

        let service = unit("loop.service", "/etc/systemd/system/loop.service", "/usr/bin/a");
        let (linked, owners) = link_service(&resolver, &matcher(), service);
        assert!(owners.is_empty());
        assert!(linked.executables.is_empty());
        assert_eq!(linked.unresolved, ["/usr/bin/a"]);
    }

    #[tokio::test]
    async fn services_seen_by_two_init_systems_are_merged() {
        use crate::init::{SystemdBackend, SysvBackend};

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("lib/systemd/system")).unwrap();
        std::fs::create_dir_all(root.join("etc/init.d")).unwrap();
        std::fs::write(
            root.join("lib/systemd/system/cron.service"),
            "[Service]\nExecStart=/usr/sbin/cron -f\n",
        )
        .unwrap();
        std::fs::write(root.join("etc/init.d/cron.service"), "DAEMON=/usr/sbin/cron-legacy\n").unwrap();

        let init = CompositeInit::new(vec![Box::new(SystemdBackend), Box::new(SysvBackend)]);
        let graph = ScanPipeline::with_backends(ScanOptions::new(root), Vec::new(), Some(init))
            .run()
            .await
            .unwrap();

        assert_eq!(graph.services.len(), 1);
        let cron = &graph.services[0];
        assert_eq!(cron.init_system, InitSystem::Systemd);
        assert_eq!(cron.path, "/lib/systemd/system/cron.service");
        assert_eq!(cron.executables, ["/usr/sbin/cron", "/usr/sbin/cron-legacy"]);
    }

    #[derive(Default)]
    struct CountingIndex {
        queries: std::sync::Mutex<Vec<String>>,
    }

    impl crate::ownership::OwnerIndex for Arc<CountingIndex> {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn owners_of(&self, path: &str) -> Result<Vec<String>, ScanError> {
            self.queries.lock().unwrap().push(path.to_string());
            Ok(Vec::new())
        }
    }

    #[test]
    fn each_path_is_queried_once() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path());
        let index = Arc::new(CountingIndex::default());
        let mut matcher = matcher();
        matcher.add_index(Box::new(Arc::clone(&index)));

        let service = unit("nginx.service", "/lib/systemd/system/nginx.service", "/usr/sbin/nginx");
        let (_, owners) = link_service(&resolver, &matcher, service);

        assert_eq!(owners, BTreeSet::from(["nginx-core".to_string()]));
        assert_eq!(*index.queries.lock().unwrap(), ["/usr/sbin/nginx"]);
    }

    struct StaticChecker;

    #[async_trait]
    impl VulnerabilityChecker for StaticChecker {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn check(
            &self,
            packages: &[(String, String)],
        ) -> Result<HashMap<String, Vec<VulnRecord>>, ScanError> {
            Ok(packages
                .iter()
                .map(|(name, _)| {
                    (
                        name.clone(),
                        vec![
                            VulnRecord::new("CVE-2023-0002", Severity::Critical, 9.8),
                            VulnRecord::new("CVE-2023-0001", Severity::Low, 2.0),
                        ],
                    )
                })
                .collect())
        }
    }

    struct FailingChecker;

    #[async_trait]
    impl VulnerabilityChecker for FailingChecker {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn check(
            &self,
            _packages: &[(String, String)],
        ) -> Result<HashMap<String, Vec<VulnRecord>>, ScanError> {
            Err(ScanError::Enrichment {
                package: "*".to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn aggregator() -> ResultAggregator {
        let aggregator = ResultAggregator::new();
        aggregator.merge_package(PackageRecord::new("openssl", "3.0.2", PackageManager::Apt));
        aggregator.merge_package(PackageRecord::new("linux-image-6.1", "6.1.0", PackageManager::Apt));
        aggregator.merge_package(PackageRecord::placeholder("mystery"));
        aggregator
    }

    #[tokio::test]
    async fn enrichment_appends_and_respects_ignores() {
        let aggregator = aggregator();
        let ignore = IgnoreConfig {
            packages: vec!["linux-image-*".to_string()],
            vulnerabilities: vec!["CVE-2023-0001".to_string()],
        };

        assert_eq!(enrich(&aggregator, &StaticChecker, &ignore).await, 1);
        // A second pass finds nothing new.
        assert_eq!(enrich(&aggregator, &StaticChecker, &ignore).await, 0);

        let graph = aggregator.finish(ScanMetadata::new("/mnt"));
        let openssl = graph.package("openssl").unwrap();
        assert_eq!(openssl.vulnerabilities.len(), 1);
        assert_eq!(openssl.vulnerabilities[0].id, "CVE-2023-0002");
        assert!(graph.package("linux-image-6.1").unwrap().vulnerabilities.is_empty());
        assert!(graph.package("mystery").unwrap().vulnerabilities.is_empty());
    }

    #[derive(Default)]
    struct RecordingChecker {
        seen: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VulnerabilityChecker for RecordingChecker {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn check(
            &self,
            packages: &[(String, String)],
        ) -> Result<HashMap<String, Vec<VulnRecord>>, ScanError> {
            self.seen.lock().unwrap().extend(packages.iter().cloned());
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn checkers_receive_upstream_versions() {
        let aggregator = ResultAggregator::new();
        aggregator.merge_package(PackageRecord::new(
            "openssh-server",
            "1:8.2p1-4ubuntu0.13",
            PackageManager::Apt,
        ));
        aggregator.merge_package(PackageRecord::new("systemd", "245.4-4ubuntu3.21", PackageManager::Apt));

        let checker = RecordingChecker::default();
        assert_eq!(enrich(&aggregator, &checker, &IgnoreConfig::default()).await, 0);

        let mut seen = checker.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            [
                ("openssh-server".to_string(), "8.2p1".to_string()),
                ("systemd".to_string(), "245.4".to_string()),
            ]
        );

        // The inventory keeps the distribution version.
        let graph = aggregator.finish(ScanMetadata::new("/mnt"));
        assert_eq!(graph.package("openssh-server").unwrap().version, "1:8.2p1-4ubuntu0.13");
    }

    #[tokio::test]
    async fn failed_enrichment_leaves_inventory_intact() {
        let aggregator = aggregator();
        assert_eq!(enrich(&aggregator, &FailingChecker, &IgnoreConfig::default()).await, 0);
        assert_eq!(aggregator.package_count(), 3);
    }

    #[test]
    fn empty_volume_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScanPipeline::new(ScanOptions::new(dir.path())).err().unwrap();
        assert!(matches!(err, ScanError::NoBackend { .. }));
        assert!(err.is_fatal());

        let err = ScanPipeline::new(ScanOptions::new(dir.path().join("missing")))
            .err()
            .unwrap();
        assert!(matches!(err, ScanError::VolumeUnreadable { .. }));
    }
}
