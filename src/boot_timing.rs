//! Service start times from a `systemd-analyze plot` SVG.
//!
//! The plot labels each unit as `name.service (123ms)` or
//! `name.service (1.204s)`; only `.service` units are read.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ScanError;
use crate::volume;

fn label_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"([^<>\n]+?\.service) \((\d+(?:\.\d+)?m?s)\)").ok())
        .as_ref()
}

/// Maps unit name to its start time label (`"123ms"`, `"1.204s"`).
/// The first label for a unit wins.
pub fn parse_plot(svg: &str) -> BTreeMap<String, String> {
    let mut times = BTreeMap::new();
    let Some(pattern) = label_pattern() else {
        return times;
    };

    for captures in pattern.captures_iter(svg) {
        let name = captures[1].trim().to_string();
        times.entry(name).or_insert_with(|| captures[2].to_string());
    }
    times
}

/// Reads and parses a plot file from the host filesystem.
pub fn load_plot(path: &Path) -> Result<BTreeMap<String, String>, ScanError> {
    let svg = volume::read_lossy(path).map_err(|e| ScanError::io(path, e))?;
    Ok(parse_plot(&svg))
}
