//! CycloneDX SBOM (Software Bill of Materials) output format.
//!
//! Generates a CycloneDX 1.5 document: one component per package, one per
//! orphan service, and a vulnerabilities section pointing back at the
//! affected package components.
//! See: https://cyclonedx.org/

use std::collections::BTreeMap;

use crate::model::{PackageRecord, ScanGraph, ServiceRecord, Severity, VulnRecord, UNKNOWN_VERSION};
use anyhow::Result;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use uuid::Uuid;

/// CycloneDX SBOM root document
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneDxBom {
    bom_format: &'static str,
    spec_version: &'static str,
    version: u32,
    serial_number: String,
    metadata: CycloneDxMetadata,
    pub components: Vec<CycloneDxComponent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<CycloneDxVulnerability>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CycloneDxMetadata {
    timestamp: String,
    tools: Vec<CycloneDxTool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    properties: Vec<CycloneDxProperty>,
}

#[derive(Serialize)]
struct CycloneDxTool {
    vendor: &'static str,
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneDxComponent {
    #[serde(rename = "type")]
    pub component_type: &'static str,
    #[serde(rename = "bom-ref")]
    pub bom_ref: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purl: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<CycloneDxProperty>,
}

#[derive(Serialize)]
pub struct CycloneDxProperty {
    pub name: String,
    pub value: String,
}

impl CycloneDxProperty {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: format!("bootsbom:{}", name),
            value: value.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneDxVulnerability {
    #[serde(rename = "bom-ref")]
    bom_ref: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    ratings: Vec<CycloneDxRating>,
    pub affects: Vec<CycloneDxAffects>,
}

#[derive(Serialize)]
struct CycloneDxRating {
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    severity: &'static str,
    method: &'static str,
}

#[derive(Serialize)]
pub struct CycloneDxAffects {
    #[serde(rename = "ref")]
    pub component_ref: String,
}

fn severity_to_cyclonedx(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
        Severity::Unknown => "unknown",
    }
}

/// Characters left as-is in a purl name or version.
const PURL_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_').remove(b'~');

/// `pkg:<distro>/<name>@<version>`, with name and version percent-encoded.
pub fn purl(distro: &str, name: &str, version: &str) -> String {
    format!(
        "pkg:{}/{}@{}",
        distro,
        utf8_percent_encode(name, PURL_SEGMENT),
        utf8_percent_encode(version, PURL_SEGMENT)
    )
}

fn package_component(package: &PackageRecord, distro: &str, services: &[&ServiceRecord]) -> CycloneDxComponent {
    let purl = purl(distro, &package.name, &package.version);

    let mut properties = Vec::new();
    if let Some(manager) = package.manager {
        properties.push(CycloneDxProperty::new("manager", manager.as_str()));
    }
    for service in services {
        properties.push(CycloneDxProperty::new("service", service.name.clone()));
    }

    CycloneDxComponent {
        component_type: if services.is_empty() { "library" } else { "application" },
        bom_ref: purl.clone(),
        name: package.name.clone(),
        version: package.version.clone(),
        purl: Some(purl),
        properties,
    }
}

fn orphan_component(service: &ServiceRecord) -> CycloneDxComponent {
    let mut properties = vec![
        CycloneDxProperty::new("init-system", service.init_system.as_str()),
        CycloneDxProperty::new("definition", service.path.clone()),
    ];
    properties.extend(
        service
            .executables
            .iter()
            .map(|exe| CycloneDxProperty::new("executable", exe.clone())),
    );

    CycloneDxComponent {
        component_type: "application",
        bom_ref: format!("service:{}", service.name),
        name: service.name.clone(),
        version: UNKNOWN_VERSION.to_string(),
        purl: None,
        properties,
    }
}

/// Builds the SBOM document for a finished scan graph.
pub fn build_bom(graph: &ScanGraph) -> CycloneDxBom {
    let distro = graph.metadata.distro.as_str();

    let mut components: Vec<CycloneDxComponent> = graph
        .packages
        .iter()
        .map(|package| {
            let services: Vec<&ServiceRecord> = graph.services_of(&package.name).collect();
            package_component(package, distro, &services)
        })
        .collect();
    components.extend(graph.orphans().map(orphan_component));

    // One entry per id, listing every affected package.
    let mut by_id: BTreeMap<&str, (&VulnRecord, Vec<CycloneDxAffects>)> = BTreeMap::new();
    for package in &graph.packages {
        for vuln in &package.vulnerabilities {
            by_id
                .entry(vuln.id.as_str())
                .or_insert_with(|| (vuln, Vec::new()))
                .1
                .push(CycloneDxAffects {
                    component_ref: purl(distro, &package.name, &package.version),
                });
        }
    }

    let vulnerabilities = by_id
        .into_iter()
        .map(|(id, (vuln, affects))| CycloneDxVulnerability {
            bom_ref: format!("vuln-{}", id),
            id: id.to_string(),
            description: vuln.description.clone(),
            ratings: vec![CycloneDxRating {
                score: (vuln.score > 0.0).then_some(vuln.score),
                severity: severity_to_cyclonedx(vuln.severity),
                method: "other",
            }],
            affects,
        })
        .collect();

    let mut properties = vec![
        CycloneDxProperty::new("volume-root", graph.metadata.volume_root.clone()),
        CycloneDxProperty::new("distro", distro),
    ];
    properties.extend(
        graph
            .metadata
            .init_systems
            .iter()
            .map(|init| CycloneDxProperty::new("init-system", init.as_str())),
    );

    CycloneDxBom {
        bom_format: "CycloneDX",
        spec_version: "1.5",
        version: 1,
        serial_number: format!("urn:uuid:{}", Uuid::new_v4()),
        metadata: CycloneDxMetadata {
            timestamp: Utc::now().to_rfc3339(),
            tools: vec![CycloneDxTool {
                vendor: "bootsbom",
                name: "bootsbom",
                version: env!("CARGO_PKG_VERSION"),
            }],
            properties,
        },
        components,
        vulnerabilities,
    }
}

/// Generate CycloneDX as a string (for file output)
pub fn generate_cyclonedx_string(graph: &ScanGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&build_bom(graph))?)
}

/// Generate and print CycloneDX SBOM output
pub fn print_cyclonedx(graph: &ScanGraph) -> Result<()> {
    println!("{}", generate_cyclonedx_string(graph)?);
    Ok(())
}
