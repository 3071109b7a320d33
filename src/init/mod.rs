//! Init system backends.
//!
//! Each backend discovers service definitions on a volume and extracts the
//! raw executable tokens they start. Tokens are returned as written; path
//! resolution and ownership happen later in the pipeline.
//!
//! | Backend | Definitions | Startup set |
//! |---------|-------------|-------------|
//! | [`SystemdBackend`] | `*.service` unit files | `*.target.wants` links |
//! | [`SysvBackend`] | `/etc/init.d` scripts | `rc{2,3,4,5}.d/S*` links |
//! | [`OpenrcBackend`] | `/etc/init.d` scripts | `runlevels/{sysinit,boot,default}` |
//!
//! Volumes carrying more than one init system are handled by
//! [`CompositeInit`].

mod composite;
mod openrc;
mod systemd;
mod sysv;

pub use composite::CompositeInit;
pub use openrc::OpenrcBackend;
pub use systemd::SystemdBackend;
pub use sysv::SysvBackend;

use std::path::Path;

use crate::model::{InitSystem, ServiceRecord};

/// Service discovery for one init system.
pub trait InitSystemBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Init systems this backend reports on.
    fn kinds(&self) -> Vec<InitSystem>;

    fn detect(&self, root: &Path) -> bool;

    /// Every service definition on the volume, enabled or not.
    fn get_all_services(&self, root: &Path) -> Vec<ServiceRecord>;

    /// Services started during a normal boot.
    fn get_startup_services(&self, root: &Path) -> Vec<ServiceRecord>;

    /// Raw executable tokens named by the definition at `definition` (a
    /// host path). Unreadable files yield an empty list.
    fn parse_service_executables(&self, definition: &Path) -> Vec<String>;
}

type Factory = fn() -> Box<dyn InitSystemBackend>;

/// Registered backends, in probe order. On a name clash the earlier
/// backend's record is kept.
const REGISTRY: &[(InitSystem, Factory)] = &[
    (InitSystem::Systemd, systemd),
    (InitSystem::Sysv, sysv),
    (InitSystem::Openrc, openrc),
];

fn systemd() -> Box<dyn InitSystemBackend> {
    Box::new(SystemdBackend)
}

fn sysv() -> Box<dyn InitSystemBackend> {
    Box::new(SysvBackend)
}

fn openrc() -> Box<dyn InitSystemBackend> {
    Box::new(OpenrcBackend)
}

pub fn all_init_systems() -> Vec<Box<dyn InitSystemBackend>> {
    REGISTRY.iter().map(|(_, factory)| factory()).collect()
}

pub fn get_init_system(kind: InitSystem) -> Option<Box<dyn InitSystemBackend>> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == kind)
        .map(|(_, factory)| factory())
}

/// All detected init systems combined, or `None` when nothing matched.
pub fn detect_init(root: &Path) -> Option<CompositeInit> {
    let detected: Vec<Box<dyn InitSystemBackend>> = all_init_systems()
        .into_iter()
        .filter(|backend| backend.detect(root))
        .collect();

    if detected.is_empty() {
        None
    } else {
        Some(CompositeInit::new(detected))
    }
}

/// Prefix characters systemd accepts in front of an `Exec*=` command.
const EXEC_MODIFIERS: &[char] = &['-', '@', '+', '!', ':'];

/// Reduces a directive value to its executable token: strips quoting and
/// exec modifiers and keeps the first word. Only absolute paths survive;
/// variable references and bare command names give `None`.
pub fn clean_exec_token(value: &str) -> Option<String> {
    let value = value
        .trim()
        .trim_start_matches(|c: char| EXEC_MODIFIERS.contains(&c) || c == '"' || c == '\'');
    let token = value
        .split_whitespace()
        .next()?
        .trim_end_matches(|c: char| c == '"' || c == '\'' || c == ';');

    if token.starts_with('/') && token.len() > 1 {
        Some(token.to_string())
    } else {
        None
    }
}

/// Values of `KEY=value` shell assignments for the given keys. Comments and
/// leading `export`/`local` are handled.
pub(crate) fn shell_assignments<'a>(
    content: &'a str,
    keys: &'a [&'a str],
) -> impl Iterator<Item = &'a str> + 'a {
    content.lines().filter_map(move |line| {
        let line = line.trim_start();
        if line.starts_with('#') {
            return None;
        }
        let line = line
            .strip_prefix("export ")
            .or_else(|| line.strip_prefix("local "))
            .unwrap_or(line)
            .trim_start();
        let (key, value) = line.split_once('=')?;
        keys.contains(&key).then_some(value)
    })
}

/// Ordered, duplicate-free list of cleaned tokens.
pub(crate) fn collect_tokens<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in values.filter_map(clean_exec_token) {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}
