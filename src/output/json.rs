use crate::model::ScanGraph;
use anyhow::Result;

/// The graph as pretty JSON with `packages`, `services` and `metadata`.
pub fn generate_json_string(graph: &ScanGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(graph)?)
}

pub fn print_json(graph: &ScanGraph) -> Result<()> {
    println!("{}", generate_json_string(graph)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InitSystem, PackageManager, PackageRecord, ScanMetadata, ServiceRecord};

    #[test]
    fn graph_keeps_top_level_sections() {
        let mut service = ServiceRecord::new("ssh.service", "/lib/systemd/system/ssh.service", InitSystem::Systemd)
            .with_executables(["/usr/sbin/sshd"]);
        service.associated_package = Some("openssh-server".to_string());
        service.owners.insert("openssh-server".to_string());

        let graph = ScanGraph {
            packages: vec![PackageRecord::new("openssh-server", "1:9.2p1-2", PackageManager::Apt)
                .with_files(["/usr/sbin/sshd"])],
            services: vec![service],
            metadata: ScanMetadata::new("/mnt/image"),
        };

        let value: serde_json::Value =
            serde_json::from_str(&generate_json_string(&graph).unwrap()).unwrap();
        assert_eq!(value["packages"][0]["name"], "openssh-server");
        assert_eq!(value["services"][0]["associatedPackage"], "openssh-server");
        assert_eq!(value["services"][0]["executableNames"][0], "sshd");
        assert_eq!(value["metadata"]["volumeRoot"], "/mnt/image");
    }
}
