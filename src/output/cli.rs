use crate::model::{ScanGraph, ScanSummary, ServiceRecord, Severity, UNKNOWN_VERSION};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "Manager")]
    manager: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Files")]
    files: usize,
    #[tabled(rename = "Services")]
    services: String,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Init")]
    init: String,
    #[tabled(rename = "Service")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Executables")]
    executables: String,
    #[tabled(rename = "Start Time")]
    time: String,
}

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "CVE")]
    cve: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub fn print_cli_table(graph: &ScanGraph) -> Result<()> {
    println!();
    println!(
        "Scan of {} completed at: {}",
        graph.metadata.volume_root,
        graph.metadata.scanned_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    print_services(graph);
    print_packages(graph);
    print_vulnerabilities(graph);

    println!();
    print_summary(&graph.summary());

    Ok(())
}

fn print_services(graph: &ScanGraph) {
    if graph.services.is_empty() {
        println!("No services found.");
        return;
    }

    let heading = if graph.metadata.startup_only {
        "startup services"
    } else {
        "services"
    };
    println!("Found {} {}:", graph.services.len(), heading);
    println!();

    let rows: Vec<ServiceRow> = graph
        .services
        .iter()
        .map(|s| ServiceRow {
            init: s.init_system.display_name().to_string(),
            name: truncate(&s.name, 40),
            status: s.status.as_str().to_string(),
            package: format_owner(s),
            executables: truncate(&s.executable_names.join(", "), 40),
            time: s.execution_time.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

fn print_packages(graph: &ScanGraph) {
    // Only packages that launch something at boot; the full inventory is
    // available through the JSON formats.
    let rows: Vec<PackageRow> = graph
        .packages
        .iter()
        .filter_map(|p| {
            let services: Vec<&str> = graph.services_of(&p.name).map(|s| s.name.as_str()).collect();
            if services.is_empty() {
                return None;
            }
            Some(PackageRow {
                manager: p
                    .manager
                    .map(|m| m.display_name().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                name: truncate(&p.name, 40),
                version: format_version(&p.version),
                files: p.files.len(),
                services: truncate(&services.join(", "), 40),
            })
        })
        .collect();

    println!();
    if rows.is_empty() {
        println!("No service-owning packages ({} packages inventoried).", graph.packages.len());
        return;
    }
    println!(
        "{} of {} packages own services:",
        rows.len(),
        graph.packages.len()
    );
    println!();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

fn print_vulnerabilities(graph: &ScanGraph) {
    let mut rows: Vec<(Severity, f64, VulnRow)> = graph
        .packages
        .iter()
        .flat_map(|p| {
            p.vulnerabilities.iter().map(move |v| {
                (
                    v.severity,
                    v.score,
                    VulnRow {
                        severity: format_severity(&v.severity),
                        package: p.name.clone(),
                        cve: v.id.clone(),
                        score: if v.score > 0.0 {
                            format!("{:.1}", v.score)
                        } else {
                            "-".to_string()
                        },
                        description: truncate(v.description.as_deref().unwrap_or("-"), 50),
                    },
                )
            })
        })
        .collect();

    if rows.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
    });

    println!();
    println!("Found {} vulnerabilities:", rows.len());
    println!();

    let table = Table::new(rows.into_iter().map(|(_, _, row)| row))
        .with(Style::rounded())
        .to_string();
    println!("{}", table);
}

fn print_summary(summary: &ScanSummary) {
    println!("Summary:");
    println!("  Total packages: {}", summary.packages);
    println!("  Total services: {}", summary.services);

    if summary.orphan_services > 0 {
        println!("  Orphan services: {} (no owning package)", summary.orphan_services);
    }
    if summary.ambiguous_services > 0 {
        println!(
            "  Ambiguous services: {} (more than one owning package)",
            summary.ambiguous_services
        );
    }
    if summary.unverified_executables > 0 {
        println!(
            "  Unverified executables: {} (missing on the volume)",
            summary.unverified_executables
        );
    }
    if summary.vulnerabilities() > 0 {
        println!(
            "  Vulnerabilities: {} critical, {} high, {} medium, {} low, {} unknown",
            summary.critical, summary.high, summary.medium, summary.low, summary.unknown
        );
    }
}

fn format_owner(service: &ServiceRecord) -> String {
    match &service.associated_package {
        None => "\x1b[33m(orphan)\x1b[0m".to_string(),
        Some(primary) if service.is_ambiguous() => {
            format!("{} (+{})", primary, service.owners.len() - 1)
        }
        Some(primary) => primary.clone(),
    }
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Unknown => "UNKNOWN".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn format_version(version: &str) -> String {
    if version == UNKNOWN_VERSION {
        "-".to_string()
    } else {
        version.to_string()
    }
}
