use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::{collect_tokens, InitSystemBackend};
use crate::model::{InitSystem, ServiceRecord, ServiceStatus};
use crate::resolve::PathResolver;
use crate::volume;

/// Unit search path, highest precedence first.
const UNIT_DIRS: &[&str] = &[
    "etc/systemd/system",
    "run/systemd/system",
    "usr/local/lib/systemd/system",
    "usr/lib/systemd/system",
    "lib/systemd/system",
];

const WANTS_DIRS: &[&str] = &[
    "etc/systemd/system/sysinit.target.wants",
    "etc/systemd/system/multi-user.target.wants",
    "etc/systemd/system/graphical.target.wants",
    "etc/systemd/system/default.target.wants",
];

const MASKED_TARGET: &str = "/dev/null";

pub struct SystemdBackend;

impl SystemdBackend {
    fn enabled_units(&self, root: &Path) -> HashSet<String> {
        WANTS_DIRS
            .iter()
            .flat_map(|dir| volume::list_dir(root, dir))
            .map(|(name, _)| name)
            .filter(|name| name.ends_with(".service"))
            .collect()
    }

    /// Locates a unit by name on the search path.
    fn find_unit(&self, root: &Path, name: &str) -> Option<String> {
        UNIT_DIRS
            .iter()
            .map(|dir| format!("/{}/{}", dir, name))
            .find(|path| volume::exists(root, path))
    }

    /// Builds a record for the unit at `link` (a volume path that may be a
    /// symlink into another unit directory).
    fn build(&self, root: &Path, name: &str, link: &str, status: ServiceStatus) -> ServiceRecord {
        let resolver = PathResolver::new(root);
        let (path, verified) = match resolver.resolve(link) {
            Ok(resolved) => (resolved.path, resolved.verified),
            Err(e) => {
                debug!(unit = name, error = %e, "unit link did not resolve");
                (link.to_string(), false)
            }
        };

        if path == MASKED_TARGET {
            return ServiceRecord::new(name, link, InitSystem::Systemd)
                .with_status(ServiceStatus::Disabled);
        }

        let executables = if verified {
            self.parse_service_executables(&volume::host_path(root, &path))
        } else {
            Vec::new()
        };

        ServiceRecord::new(name, path, InitSystem::Systemd)
            .with_status(status)
            .with_executables(executables)
    }
}

impl InitSystemBackend for SystemdBackend {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn kinds(&self) -> Vec<InitSystem> {
        vec![InitSystem::Systemd]
    }

    fn detect(&self, root: &Path) -> bool {
        UNIT_DIRS.iter().any(|dir| volume::is_dir(root, dir))
    }

    fn get_all_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let enabled = self.enabled_units(root);
        let mut seen = HashSet::new();
        let mut services = Vec::new();

        for dir in UNIT_DIRS {
            for (name, _) in volume::list_dir(root, dir) {
                if !name.ends_with(".service") || !seen.insert(name.clone()) {
                    continue;
                }
                let status = if enabled.contains(&name) {
                    ServiceStatus::Enabled
                } else {
                    ServiceStatus::Disabled
                };
                let link = format!("/{}/{}", dir, name);
                services.push(self.build(root, &name, &link, status));
            }
        }

        debug!(count = services.len(), "found systemd units");
        services
    }

    fn get_startup_services(&self, root: &Path) -> Vec<ServiceRecord> {
        let mut seen = HashSet::new();
        let mut services = Vec::new();

        for dir in WANTS_DIRS {
            for (name, _) in volume::list_dir(root, dir) {
                if !name.ends_with(".service") || !seen.insert(name.clone()) {
                    continue;
                }

                let mut link = format!("/{}/{}", dir, name);
                let dangling = !matches!(
                    PathResolver::new(root).resolve(&link),
                    Ok(resolved) if resolved.verified
                );
                if dangling {
                    if let Some(found) = self.find_unit(root, &name) {
                        link = found;
                    }
                }
                services.push(self.build(root, &name, &link, ServiceStatus::Enabled));
            }
        }

        debug!(count = services.len(), "found enabled systemd units");
        services
    }

    fn parse_service_executables(&self, definition: &Path) -> Vec<String> {
        match volume::read_lossy(definition) {
            Ok(content) => extract_exec_tokens(&content),
            Err(e) => {
                debug!(path = %definition.display(), error = %e, "unreadable unit file");
                Vec::new()
            }
        }
    }
}

/// Joins backslash-continued lines of a unit file.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if let Some(head) = line.strip_suffix('\\') {
            current.push_str(head);
            current.push(' ');
        } else {
            current.push_str(line);
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Executable tokens from every `Exec*=` directive of a unit file.
pub(crate) fn extract_exec_tokens(content: &str) -> Vec<String> {
    let lines = logical_lines(content);
    let values = lines.iter().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        (key.starts_with("Exec") && key != "ExecSearchPath").then_some(value)
    });
    collect_tokens(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const NGINX_UNIT: &str = "\
[Unit]
Description=A high performance web server
# ExecStart=/usr/sbin/commented

[Service]
Type=forking
ExecStartPre=/usr/sbin/nginx -t -q -g 'daemon on; master_process on;'
ExecStart=/usr/sbin/nginx -g 'daemon on; master_process on;'
ExecReload=-/bin/kill -s HUP $MAINPID
ExecStop=-/sbin/start-stop-daemon --quiet --stop \\
    --retry QUIT/5 --pidfile /run/nginx.pid
ExecStartPost=$HELPER
Environment=PATH=/usr/bin

[Install]
WantedBy=multi-user.target
";

    #[test]
    fn exec_tokens_in_order_without_duplicates() {
        assert_eq!(
            extract_exec_tokens(NGINX_UNIT),
            ["/usr/sbin/nginx", "/bin/kill", "/sbin/start-stop-daemon"]
        );
    }

    #[test]
    fn empty_exec_resets_are_ignored() {
        assert_eq!(
            extract_exec_tokens("[Service]\nExecStart=\nExecStart=/usr/bin/real\n"),
            ["/usr/bin/real"]
        );
    }

    #[cfg(unix)]
    fn volume_with_nginx() -> tempfile::TempDir {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib/systemd/system");
        let wants = dir.path().join("etc/systemd/system/multi-user.target.wants");
        fs::create_dir_all(&lib).unwrap();
        fs::create_dir_all(&wants).unwrap();

        fs::write(lib.join("nginx.service"), NGINX_UNIT).unwrap();
        fs::write(lib.join("rescue.service"), "[Service]\nExecStart=/bin/sulogin\n").unwrap();
        fs::write(lib.join("sys.target"), "").unwrap();
        symlink("/lib/systemd/system/nginx.service", wants.join("nginx.service")).unwrap();
        symlink("/dev/null", dir.path().join("etc/systemd/system/rescue.service")).unwrap();
        dir
    }

    #[cfg(unix)]
    #[test]
    fn all_services_with_status() {
        let dir = volume_with_nginx();
        let backend = SystemdBackend;
        assert!(backend.detect(dir.path()));

        let services = backend.get_all_services(dir.path());
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["rescue.service", "nginx.service"]);

        let rescue = &services[0];
        assert_eq!(rescue.status, ServiceStatus::Disabled);
        assert!(rescue.executables.is_empty());

        let nginx = &services[1];
        assert_eq!(nginx.status, ServiceStatus::Enabled);
        assert_eq!(nginx.path, "/lib/systemd/system/nginx.service");
        assert_eq!(nginx.executables[0], "/usr/sbin/nginx");
    }

    #[cfg(unix)]
    #[test]
    fn startup_services_follow_wants_links() {
        let dir = volume_with_nginx();
        let services = SystemdBackend.get_startup_services(dir.path());
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "nginx.service");
        assert_eq!(services[0].path, "/lib/systemd/system/nginx.service");
        assert_eq!(services[0].status, ServiceStatus::Enabled);
    }
}
