mod cli;
mod cyclonedx;
mod json;

pub use cli::print_cli_table;
pub use cyclonedx::{build_bom, generate_cyclonedx_string, print_cyclonedx, purl};
pub use json::{generate_json_string, print_json};

use crate::model::ScanGraph;
use anyhow::Result;

/// Output format for scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables
    Table,
    /// The scan graph as JSON
    Json,
    /// CycloneDX 1.5 SBOM
    CycloneDx,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "cyclonedx" | "cdx" | "sbom" => Ok(OutputFormat::CycloneDx),
            _ => Err(format!(
                "Unknown format: {}. Use 'table', 'json', or 'cyclonedx'",
                s
            )),
        }
    }
}

pub fn print_result(graph: &ScanGraph, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_cli_table(graph),
        OutputFormat::Json => print_json(graph),
        OutputFormat::CycloneDx => print_cyclonedx(graph),
    }
}

/// Format result to string for file output
pub fn format_result_to_string(graph: &ScanGraph, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => generate_json_string(graph),
        OutputFormat::CycloneDx => generate_cyclonedx_string(graph),
        // Tables are for terminals; files get the JSON graph.
        OutputFormat::Table => generate_json_string(graph),
    }
}
