use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::{collect_tokens, shell_assignments, InitSystemBackend};
use crate::model::{InitSystem, ServiceRecord, ServiceStatus};
use crate::volume;

const INIT_DIR: &str = "etc/init.d";
const RUNLEVELS_DIR: &str = "etc/runlevels";
const BOOT_RUNLEVELS: &[&str] = &["sysinit", "boot", "default"];

pub struct OpenrcBackend;

impl OpenrcBackend {
    fn runlevel_members(&self, root: &Path, levels: &[&str]) -> Vec<String> {
        let mut seen = HashSet::new();
        levels
            .iter()
            .flat_map(|level| volume::list_dir(root, &format!("{}/{}", RUNLEVELS_DIR, level)))
            .map(|(name, _)| name)
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    fn all_runlevels(&self, root: &Path) -> Vec<String> {
        volume::list_dir(root, RUNLEVELS_DIR)
            .into_iter()
            .filter(|(_, path)| path.is_dir())
            .map(|(name, _)| name)
            .collect()
    }

    fn build(&self, root: &Path, name: &str, status: ServiceStatus) -> ServiceRecord {
        let script = format!("/{}/{}", INIT_DIR, name);
        let host = volume::host_path(root, &script);
        ServiceRecord::new(name, script, InitSystem::Openrc)
            .with_status(status)
            .with_executables(self.parse_service_executables(&host))
    }
}

impl InitSystemBackend for OpenrcBackend {
    fn name(&self) -> &'static str {
        "openrc"
    }

    fn kinds(&self) -> Vec<InitSystem> {
        vec![InitSystem::Openrc]
    }

    fn detect(&self, root: &Path) -> bool {
        volume::is_dir(root, RUNLEVELS_DIR)
    }

    fn get_all_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let levels = self.all_runlevels(root);
        let levels: Vec<&str> = levels.iter().map(String::as_str).collect();
        let enabled: HashSet<String> = self.runlevel_members(root, &levels).into_iter().collect();

        let services: Vec<ServiceRecord> = volume::list_dir(root, INIT_DIR)
            .into_iter()
            .filter(|(name, path)| !name.starts_with('.') && path.is_file())
            .map(|(name, _)| {
                let status = if enabled.contains(&name) {
                    ServiceStatus::Enabled
                } else {
                    ServiceStatus::Disabled
                };
                self.build(root, &name, status)
            })
            .collect();

        debug!(count = services.len(), "found openrc scripts");
        services
    }

    fn get_startup_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let services: Vec<ServiceRecord> = self
            .runlevel_members(root, BOOT_RUNLEVELS)
            .into_iter()
            .map(|name| self.build(root, &name, ServiceStatus::Enabled))
            .collect();

        debug!(count = services.len(), "found openrc boot services");
        services
    }

    fn parse_service_executables(&self, definition: &Path) -> Vec<String> {
        match volume::read_lossy(definition) {
            Ok(content) => extract_command(&content),
            Err(e) => {
                debug!(path = %definition.display(), error = %e, "unreadable openrc script");
                Vec::new()
            }
        }
    }
}

/// Executable tokens from `command=` assignments.
pub(crate) fn extract_command(content: &str) -> Vec<String> {
    collect_tokens(shell_assignments(content, &["command"]))
}
