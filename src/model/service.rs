use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::UNKNOWN_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    Systemd,
    Sysv,
    Openrc,
}

impl InitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::Sysv => "sysv",
            InitSystem::Openrc => "openrc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::Sysv => "SysV init",
            InitSystem::Openrc => "OpenRC",
        }
    }
}

impl std::fmt::Display for InitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Enabled,
    Disabled,
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Enabled => "enabled",
            ServiceStatus::Disabled => "disabled",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    /// Volume-relative path of the unit or init script.
    pub path: String,
    pub init_system: InitSystem,
    pub status: ServiceStatus,
    /// Ordered, duplicate-free. Raw tokens before resolution, canonical
    /// paths afterwards.
    pub executables: Vec<String>,
    pub executable_names: Vec<String>,
    /// Executables whose canonical path does not exist on the volume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unverified: Vec<String>,
    /// Raw tokens that could not be resolved at all (symlink loops).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    pub associated_package: Option<String>,
    /// Every package that owns one of this service's paths.
    #[serde(default)]
    pub owners: BTreeSet<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>, init_system: InitSystem) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            init_system,
            status: ServiceStatus::Unknown,
            executables: Vec::new(),
            executable_names: Vec::new(),
            unverified: Vec::new(),
            unresolved: Vec::new(),
            associated_package: None,
            owners: BTreeSet::new(),
            version: UNKNOWN_VERSION.to_string(),
            execution_time: None,
        }
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_executables<I, S>(mut self, executables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for exe in executables {
            self.add_executable(exe.into());
        }
        self
    }

    /// Appends an executable unless it is already present.
    pub fn add_executable(&mut self, path: String) {
        if self.executables.contains(&path) {
            return;
        }
        let name = basename(&path).to_string();
        if !self.executable_names.contains(&name) {
            self.executable_names.push(name);
        }
        self.executables.push(path);
    }

    pub fn is_orphan(&self) -> bool {
        self.associated_package.is_none()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.owners.len() > 1
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
