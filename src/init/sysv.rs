use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::{collect_tokens, shell_assignments, InitSystemBackend};
use crate::model::{InitSystem, ServiceRecord, ServiceStatus};
use crate::resolve::PathResolver;
use crate::volume;

const INIT_DIR: &str = "etc/init.d";
const BOOT_RUNLEVELS: &[&str] = &["2", "3", "4", "5"];
const ALL_RUNLEVELS: &[&str] = &["0", "1", "2", "3", "4", "5", "6", "S"];
const DIRECTIVES: &[&str] = &["DAEMON", "BINARY", "COMMAND"];

/// Helper files shipped in init.d that are not services.
const NOT_SERVICES: &[&str] = &["README", "skeleton", "functions", "rc", "rcS", "halt", "reboot"];

pub struct SysvBackend;

fn rc_dir(level: &str) -> String {
    format!("etc/rc{}.d", level)
}

/// Service name of an rc link: `S01nginx` and `K20nginx` give `nginx`.
pub(crate) fn rc_link_service(link: &str) -> Option<&str> {
    let rest = link.strip_prefix('S').or_else(|| link.strip_prefix('K'))?;
    let name = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    (!name.is_empty() && name.len() < rest.len()).then_some(name)
}

impl SysvBackend {
    fn status_of(&self, root: &Path, service: &str) -> ServiceStatus {
        let mut killed = false;
        for level in ALL_RUNLEVELS {
            for (link, _) in volume::list_dir(root, &rc_dir(level)) {
                if rc_link_service(&link) != Some(service) {
                    continue;
                }
                if link.starts_with('S') && BOOT_RUNLEVELS.contains(level) {
                    return ServiceStatus::Enabled;
                }
                killed = true;
            }
        }
        if killed {
            ServiceStatus::Disabled
        } else {
            ServiceStatus::Unknown
        }
    }

    fn build(&self, root: &Path, name: &str, script: &str, status: ServiceStatus) -> ServiceRecord {
        let host = volume::host_path(root, script);
        ServiceRecord::new(name, script, InitSystem::Sysv)
            .with_status(status)
            .with_executables(self.parse_service_executables(&host))
    }
}

impl InitSystemBackend for SysvBackend {
    fn name(&self) -> &'static str {
        "sysv"
    }

    fn kinds(&self) -> Vec<InitSystem> {
        vec![InitSystem::Sysv]
    }

    /// init.d plus at least one rc directory; OpenRC volumes share init.d
    /// but carry `/etc/runlevels` instead.
    fn detect(&self, root: &Path) -> bool {
        volume::is_dir(root, INIT_DIR)
            && !volume::is_dir(root, "etc/runlevels")
            && ALL_RUNLEVELS.iter().any(|level| volume::is_dir(root, &rc_dir(level)))
    }

    fn get_all_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let services: Vec<ServiceRecord> = volume::list_dir(root, INIT_DIR)
            .into_iter()
            .filter(|(name, path)| {
                !name.starts_with('.') && !NOT_SERVICES.contains(&name.as_str()) && path.is_file()
            })
            .map(|(name, _)| {
                let script = format!("/{}/{}", INIT_DIR, name);
                let status = self.status_of(root, &name);
                self.build(root, &name, &script, status)
            })
            .collect();

        debug!(count = services.len(), "found sysv scripts");
        services
    }

    fn get_startup_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let resolver = PathResolver::new(root);
        let mut seen = HashSet::new();
        let mut services = Vec::new();

        for level in BOOT_RUNLEVELS {
            let dir = rc_dir(level);
            for (link, _) in volume::list_dir(root, &dir) {
                if !link.starts_with('S') {
                    continue;
                }
                let Some(name) = rc_link_service(&link) else {
                    continue;
                };
                if !seen.insert(name.to_string()) {
                    continue;
                }

                let script = match resolver.resolve(&format!("/{}/{}", dir, link)) {
                    Ok(resolved) if resolved.verified => resolved.path,
                    _ => format!("/{}/{}", INIT_DIR, name),
                };
                services.push(self.build(root, name, &script, ServiceStatus::Enabled));
            }
        }

        debug!(count = services.len(), "found sysv boot services");
        services
    }

    fn parse_service_executables(&self, definition: &Path) -> Vec<String> {
        match volume::read_lossy(definition) {
            Ok(content) => extract_directives(&content),
            Err(e) => {
                debug!(path = %definition.display(), error = %e, "unreadable init script");
                Vec::new()
            }
        }
    }
}

/// Executable tokens from `DAEMON=`, `BINARY=` and `COMMAND=` assignments.
pub(crate) fn extract_directives(content: &str) -> Vec<String> {
    collect_tokens(shell_assignments(content, DIRECTIVES))
}
