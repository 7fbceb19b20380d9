use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::observation::{CellKey, RateObservation};
use crate::summary::RunSummary;

pub const DEFAULT_OUTPUT: &str = "data/competitor-rates.json";

/// The persisted run document read by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFile {
    pub scraped_at: DateTime<Utc>,
    pub total_data_points: usize,
    pub summary: Vec<RunSummary>,
    pub results: Vec<RateObservation>,
}

impl RunFile {
    pub fn new(summary: Vec<RunSummary>, results: Vec<RateObservation>) -> Self {
        Self {
            scraped_at: Utc::now(),
            total_data_points: results.len(),
            summary,
            results,
        }
    }
}

// ── Persistence ──

/// Overwrite `path` with `file`: written to a sibling temp file, then renamed
/// over the target so readers never see a partial document.
pub fn save(path: &Path, file: &RunFile) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(file).context("Failed to serialize run file")?;

    let tmp = temp_path(path);
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<RunFile> {
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed run file {}", path.display()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Merge ──

/// Combine run files. A cell present in several files takes the observation
/// from the last one; cells keep the position of their first appearance.
pub fn merge(files: &[RunFile]) -> RunFile {
    let mut order: Vec<CellKey> = Vec::new();
    let mut latest: HashMap<CellKey, &RateObservation> = HashMap::new();
    for obs in files.iter().flat_map(|f| &f.results) {
        let key = obs.key();
        if latest.insert(key.clone(), obs).is_none() {
            order.push(key);
        }
    }

    let results: Vec<RateObservation> = order
        .iter()
        .filter_map(|k| latest.get(k).map(|o| (*o).clone()))
        .collect();
    info!(
        "Merged {} files: {} observations, {} unique cells",
        files.len(),
        files.iter().map(|f| f.results.len()).sum::<usize>(),
        results.len()
    );
    RunFile::new(RunSummary::all_in(&results), results)
}
