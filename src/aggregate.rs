//! Thread-safe accumulation of scan results.
//!
//! Every merge is monotonic: information already in the graph is never
//! removed or downgraded, and merging the same record twice is a no-op.
//! Conflicting package versions keep the first one seen.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::model::{
    is_known_version, sort_by_severity, FileRecord, PackageRecord, ScanGraph, ScanMetadata,
    ServiceRecord, ServiceStatus, VulnRecord,
};

#[derive(Default)]
struct GraphState {
    packages: BTreeMap<String, PackageRecord>,
    services: BTreeMap<String, ServiceRecord>,
}

#[derive(Default)]
pub struct ResultAggregator {
    state: Mutex<GraphState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn merge_package(&self, record: PackageRecord) {
        let mut state = self.lock();
        merge_package_into(&mut state.packages, record);
    }

    /// Merges a service and links it to the owners it names.
    pub fn merge_service(&self, record: ServiceRecord) {
        let mut state = self.lock();
        let GraphState { packages, services } = &mut *state;

        let name = record.name.clone();
        let owners = record.owners.clone();
        match services.get_mut(&name) {
            Some(existing) => merge_service_fields(existing, record),
            None => {
                services.insert(name.clone(), record);
            }
        }
        link_owners(packages, services, &name, owners);
    }

    /// Records `owners` for an already merged service, creating placeholder
    /// packages for owners that were never enumerated. Returns false when
    /// the service is unknown.
    pub fn associate(&self, service: &str, owners: BTreeSet<String>) -> bool {
        let mut state = self.lock();
        let GraphState { packages, services } = &mut *state;
        if !services.contains_key(service) {
            return false;
        }
        link_owners(packages, services, service, owners);
        true
    }

    /// Appends vulnerabilities to a package, skipping ids it already has.
    /// Returns how many were added, or `None` when the package is not in
    /// the graph.
    pub fn attach_vulnerabilities(&self, package: &str, vulns: Vec<VulnRecord>) -> Option<usize> {
        let mut state = self.lock();
        let record = state.packages.get_mut(package)?;
        Some(append_vulns(&mut record.vulnerabilities, vulns))
    }

    pub fn set_execution_time(&self, service: &str, time: impl Into<String>) -> bool {
        let mut state = self.lock();
        match state.services.get_mut(service) {
            Some(record) if record.execution_time.is_none() => {
                record.execution_time = Some(time.into());
                true
            }
            _ => false,
        }
    }

    /// `(name, version)` of every package with a known version.
    pub fn package_versions(&self) -> Vec<(String, String)> {
        self.lock()
            .packages
            .values()
            .filter(|p| p.has_known_version())
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect()
    }

    pub fn package_count(&self) -> usize {
        self.lock().packages.len()
    }

    pub fn service_count(&self) -> usize {
        self.lock().services.len()
    }

    /// Consumes the aggregator; packages and services come out sorted by name.
    pub fn finish(self, metadata: ScanMetadata) -> ScanGraph {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        ScanGraph {
            packages: state.packages.into_values().collect(),
            services: state.services.into_values().collect(),
            metadata,
        }
    }
}

fn link_owners(
    packages: &mut BTreeMap<String, PackageRecord>,
    services: &mut BTreeMap<String, ServiceRecord>,
    name: &str,
    owners: BTreeSet<String>,
) {
    let Some(service) = services.get_mut(name) else {
        return;
    };

    for owner in &owners {
        if !packages.contains_key(owner) {
            debug!(package = %owner, service = %name, "adding placeholder owner");
            packages.insert(owner.clone(), PackageRecord::placeholder(owner));
        }
    }
    service.owners.extend(owners);

    if service.associated_package.is_none() {
        service.associated_package = service.owners.iter().next().cloned();
    }
    if let Some(owner) = &service.associated_package {
        if !packages.contains_key(owner) {
            packages.insert(owner.clone(), PackageRecord::placeholder(owner));
        }
        service.owners.insert(owner.clone());
    }

    let version = service
        .associated_package
        .as_ref()
        .and_then(|owner| packages.get(owner))
        .filter(|package| package.has_known_version())
        .map(|package| package.version.clone());
    if let Some(version) = version {
        if !is_known_version(&service.version) {
            service.version = version;
        }
    }
}

fn merge_package_into(packages: &mut BTreeMap<String, PackageRecord>, record: PackageRecord) {
    let Some(existing) = packages.get_mut(&record.name) else {
        packages.insert(record.name.clone(), record);
        return;
    };

    if !existing.has_known_version() {
        existing.version = record.version;
    } else if is_known_version(&record.version) && record.version != existing.version {
        debug!(
            package = %existing.name,
            kept = %existing.version,
            ignored = %record.version,
            "conflicting versions, keeping first"
        );
    }

    if existing.manager.is_none() {
        existing.manager = record.manager;
    }

    for file in record.files {
        merge_file(&mut existing.files, file);
    }

    append_vulns(&mut existing.vulnerabilities, record.vulnerabilities);
}

/// A verified sighting of a path upgrades an unverified one, never the
/// reverse.
fn merge_file(files: &mut BTreeSet<FileRecord>, file: FileRecord) {
    match files.get(&file) {
        Some(current) if current.unverified && !file.unverified => {
            files.replace(file);
        }
        Some(_) => {}
        None => {
            files.insert(file);
        }
    }
}

fn merge_service_fields(existing: &mut ServiceRecord, record: ServiceRecord) {
    if existing.path.is_empty() {
        existing.path = record.path;
    }
    if existing.status == ServiceStatus::Unknown {
        existing.status = record.status;
    }
    for exe in record.executables {
        existing.add_executable(exe);
    }
    for path in record.unverified {
        if !existing.unverified.contains(&path) {
            existing.unverified.push(path);
        }
    }
    for raw in record.unresolved {
        if !existing.unresolved.contains(&raw) {
            existing.unresolved.push(raw);
        }
    }
    existing.owners.extend(record.owners);
    if existing.associated_package.is_none() {
        existing.associated_package = record.associated_package;
    }
    if !is_known_version(&existing.version) {
        existing.version = record.version;
    }
    if existing.execution_time.is_none() {
        existing.execution_time = record.execution_time;
    }
}

fn append_vulns(current: &mut Vec<VulnRecord>, incoming: Vec<VulnRecord>) -> usize {
    let before = current.len();
    for vuln in incoming {
        if !current.iter().any(|v| v.id == vuln.id) {
            current.push(vuln);
        }
    }
    let added = current.len() - before;
    if added > 0 {
        sort_by_severity(current);
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InitSystem, PackageManager, Severity};

    fn nginx() -> PackageRecord {
        PackageRecord::new("nginx", "1.18.0-6", PackageManager::Apt).with_files(["/usr/sbin/nginx"])
    }

    fn nginx_service() -> ServiceRecord {
        let mut svc = ServiceRecord::new(
            "nginx.service",
            "/lib/systemd/system/nginx.service",
            InitSystem::Systemd,
        )
        .with_status(ServiceStatus::Enabled)
        .with_executables(["/usr/sbin/nginx"]);
        svc.owners.insert("nginx".to_string());
        svc
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let agg = ResultAggregator::new();
        agg.merge_package(nginx());
        agg.merge_package(nginx());
        agg.merge_service(nginx_service());
        agg.merge_service(nginx_service());

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        assert_eq!(graph.packages.len(), 1);
        assert_eq!(graph.packages[0].files.len(), 1);
        assert_eq!(graph.services.len(), 1);
        assert_eq!(graph.services[0].executables, ["/usr/sbin/nginx"]);
    }

    #[test]
    fn first_known_version_wins() {
        let agg = ResultAggregator::new();
        agg.merge_package(PackageRecord::placeholder("openssl"));
        agg.merge_package(PackageRecord::new("openssl", "3.0.2", PackageManager::Apt));
        agg.merge_package(PackageRecord::new("openssl", "3.0.9", PackageManager::Rpm));

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        let openssl = graph.package("openssl").unwrap();
        assert_eq!(openssl.version, "3.0.2");
        assert_eq!(openssl.manager, Some(PackageManager::Apt));
    }

    #[test]
    fn files_and_executables_only_grow() {
        let agg = ResultAggregator::new();
        agg.merge_package(nginx());
        agg.merge_package(
            PackageRecord::new("nginx", "1.18.0-6", PackageManager::Apt)
                .with_files(["/etc/nginx/nginx.conf"]),
        );

        let mut second = nginx_service();
        second.executables.clear();
        second.executable_names.clear();
        second = second.with_executables(["/bin/kill"]);
        agg.merge_service(nginx_service());
        agg.merge_service(second);

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        assert_eq!(graph.packages[0].files.len(), 2);
        assert_eq!(
            graph.services[0].executables,
            ["/usr/sbin/nginx", "/bin/kill"]
        );
    }

    fn cron(init: InitSystem, path: &str, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord::new("cron", path, init).with_status(status)
    }

    #[test]
    fn unknown_status_is_replaced_by_a_known_one() {
        let agg = ResultAggregator::new();
        agg.merge_service(cron(InitSystem::Sysv, "/etc/init.d/cron", ServiceStatus::Unknown));
        agg.merge_service(cron(InitSystem::Systemd, "/lib/systemd/system/cron.service", ServiceStatus::Enabled));

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        let service = graph.service("cron").unwrap();
        assert_eq!(service.status, ServiceStatus::Enabled);
        assert_eq!(service.path, "/etc/init.d/cron");
        assert_eq!(service.init_system, InitSystem::Sysv);
    }

    #[test]
    fn service_merges_keep_first_seen_fields() {
        let agg = ResultAggregator::new();

        let mut first = cron(InitSystem::Systemd, "/lib/systemd/system/cron.service", ServiceStatus::Disabled);
        first.unverified.push("/usr/sbin/cron".to_string());
        first.unresolved.push("/usr/bin/loop".to_string());
        agg.merge_service(first);
        assert!(agg.set_execution_time("cron", "1.204s"));

        let mut second = cron(InitSystem::Sysv, "/etc/init.d/cron", ServiceStatus::Enabled);
        second.unverified.extend(["/usr/sbin/cron".to_string(), "/usr/sbin/cron-legacy".to_string()]);
        second.unresolved.extend(["/usr/bin/loop".to_string(), "$DAEMON_PATH".to_string()]);
        second.execution_time = Some("9.999s".to_string());
        agg.merge_service(second);
        assert!(!agg.set_execution_time("cron", "0.001s"));

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        let service = graph.service("cron").unwrap();
        assert_eq!(service.status, ServiceStatus::Disabled);
        assert_eq!(service.path, "/lib/systemd/system/cron.service");
        assert_eq!(service.execution_time.as_deref(), Some("1.204s"));
        assert_eq!(service.unverified, ["/usr/sbin/cron", "/usr/sbin/cron-legacy"]);
        assert_eq!(service.unresolved, ["/usr/bin/loop", "$DAEMON_PATH"]);
    }

    #[test]
    fn verified_file_replaces_unverified() {
        let mut files = BTreeSet::new();
        merge_file(&mut files, FileRecord::unverified("/usr/bin/x"));
        merge_file(&mut files, FileRecord::new("/usr/bin/x"));
        assert!(!files.iter().next().unwrap().unverified);

        merge_file(&mut files, FileRecord::unverified("/usr/bin/x"));
        assert!(!files.iter().next().unwrap().unverified);
    }

    #[test]
    fn orphans_are_kept() {
        let agg = ResultAggregator::new();
        agg.merge_service(ServiceRecord::new(
            "custom.service",
            "/etc/systemd/system/custom.service",
            InitSystem::Systemd,
        ));

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        assert_eq!(graph.services.len(), 1);
        assert!(graph.services[0].is_orphan());
        assert!(graph.packages.is_empty());
    }

    #[test]
    fn owners_become_packages_and_versions_flow_to_services() {
        let agg = ResultAggregator::new();
        agg.merge_package(nginx());

        let mut svc = nginx_service();
        svc.owners.insert("nginx-common".to_string());
        agg.merge_service(svc);

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        assert!(graph.dangling_associations().is_empty());
        assert!(graph.package("nginx-common").is_some());

        let service = graph.service("nginx.service").unwrap();
        assert_eq!(service.associated_package.as_deref(), Some("nginx"));
        assert_eq!(service.version, "1.18.0-6");
        assert!(service.is_ambiguous());
    }

    #[test]
    fn associate_after_merge() {
        let agg = ResultAggregator::new();
        agg.merge_service(ServiceRecord::new("sshd", "/etc/init.d/sshd", InitSystem::Openrc));
        assert!(agg.associate("sshd", BTreeSet::from(["openssh-server".to_string()])));
        assert!(!agg.associate("missing", BTreeSet::new()));

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        let sshd = graph.service("sshd").unwrap();
        assert_eq!(sshd.associated_package.as_deref(), Some("openssh-server"));
        assert_eq!(sshd.version, "unknown");
        assert!(!graph.package("openssh-server").unwrap().has_known_version());
    }

    #[test]
    fn vulnerabilities_are_deduplicated_and_sorted() {
        let agg = ResultAggregator::new();
        agg.merge_package(nginx());

        assert_eq!(
            agg.attach_vulnerabilities(
                "nginx",
                vec![VulnRecord::new("CVE-2021-23017", Severity::High, 7.7)]
            ),
            Some(1)
        );
        assert_eq!(
            agg.attach_vulnerabilities(
                "nginx",
                vec![
                    VulnRecord::new("CVE-2021-23017", Severity::High, 7.7),
                    VulnRecord::new("CVE-2022-41741", Severity::Critical, 9.1),
                ]
            ),
            Some(1)
        );
        assert_eq!(agg.attach_vulnerabilities("missing", vec![]), None);

        let graph = agg.finish(ScanMetadata::new("/mnt"));
        let ids: Vec<&str> = graph.packages[0]
            .vulnerabilities
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(ids, ["CVE-2022-41741", "CVE-2021-23017"]);
    }

    #[test]
    fn concurrent_merges() {
        use std::sync::Arc;

        let agg = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    agg.merge_package(
                        PackageRecord::new("shared", "1.0", PackageManager::Apt)
                            .with_files([format!("/usr/lib/shared/{}", i)]),
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(agg.package_count(), 1);
        let graph = Arc::try_unwrap(agg).ok().unwrap().finish(ScanMetadata::new("/"));
        assert_eq!(graph.packages[0].files.len(), 8);
    }
}
