use std::path::Path;

use super::InitSystemBackend;
use crate::model::{InitSystem, ServiceRecord};

/// Several init systems on one volume, queried in registry order. Records
/// are returned from every member; a name reported twice is merged by the
/// aggregator, which keeps the first record's fields and unions executables.
pub struct CompositeInit {
    members: Vec<Box<dyn InitSystemBackend>>,
}

impl CompositeInit {
    pub fn new(members: Vec<Box<dyn InitSystemBackend>>) -> Self {
        Self { members }
    }

    fn merged(&self, collect: impl Fn(&dyn InitSystemBackend) -> Vec<ServiceRecord>) -> Vec<ServiceRecord> {
        self.members
            .iter()
            .flat_map(|member| collect(member.as_ref()))
            .collect()
    }
}

impl InitSystemBackend for CompositeInit {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn kinds(&self) -> Vec<InitSystem> {
        self.members.iter().flat_map(|m| m.kinds()).collect()
    }

    fn detect(&self, root: &Path) -> bool {
        self.members.iter().any(|m| m.detect(root))
    }

    fn get_all_services(&self, root: &Path) -> Vec<ServiceRecord> {
        self.merged(|member| member.get_all_services(root))
    }

    fn get_startup_services(&self, root: &Path) -> Vec<ServiceRecord> {
        self.merged(|member| member.get_startup_services(root))
    }

    /// Uses the first member that finds anything in the definition.
    fn parse_service_executables(&self, definition: &Path) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.parse_service_executables(definition))
            .find(|found| !found.is_empty())
            .unwrap_or_default()
    }
}
