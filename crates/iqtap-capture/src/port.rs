//! RF port descriptors and their JSON sidecars.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CaptureError, Result};

/// Configuration tables that list cells with their owning `rf_port`.
pub const CELL_TABLES: &[&str] = &["cells", "nr_cells", "nb_cells"];

/// One RF port as reported by the capture reply, plus enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfPort {
    pub index: u32,
    /// Samples per second.
    pub sample_rate: u64,
    /// Numerology; a subframe holds `2^mu` slots.
    #[serde(default)]
    pub mu: u32,
    /// Frame number at `timestamp`.
    #[serde(default)]
    pub frame: i64,
    /// Slot within the frame at `timestamp`.
    #[serde(default)]
    pub slot: i64,
    /// Absolute sample timestamp of the starting slot.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rx_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tx_files: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_overflows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_overflows: Option<u64>,
    #[serde(default)]
    pub cells: Vec<Value>,
    #[serde(default)]
    pub slots_per_subframe: u32,
    /// Capture start, RFC 3339 UTC.
    #[serde(default)]
    pub date: Option<String>,
    /// Fields not interpreted here, kept for the sidecar.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RfPort {
    /// Attach matching cells, derive `slots_per_subframe` and stamp the capture date.
    pub fn enrich(&mut self, config: Option<&Value>, dump_utc: Option<i64>) {
        self.cells = config
            .map(|config| matching_cells(config, self.index))
            .unwrap_or_default();
        self.slots_per_subframe = 1u32.checked_shl(self.mu).unwrap_or(0);
        self.date = dump_utc.and_then(capture_date);

        if let Some(lost) = self.rx_overflows.filter(|n| *n > 0) {
            warn!(port = self.index, lost, "RX samples lost");
        }
        if let Some(lost) = self.tx_overflows.filter(|n| *n > 0) {
            warn!(port = self.index, lost, "TX samples lost");
        }
    }

    /// `<dir>/rf_port<index>`, the prefix of every artifact for this port.
    pub fn basename(&self, dir: &Path) -> PathBuf {
        dir.join(format!("rf_port{}", self.index))
    }

    /// Write the pretty-printed descriptor to `<dir>/rf_port<index>.json`.
    pub fn write_sidecar(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("rf_port{}.json", self.index));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|err| CaptureError::OutputDir {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        Ok(path)
    }
}

/// Cells from every configuration table whose `rf_port` equals `index`.
///
/// Tables may be arrays or objects keyed by cell id.
pub fn matching_cells(config: &Value, index: u32) -> Vec<Value> {
    let mut cells = Vec::new();
    for table in CELL_TABLES {
        let entries: Vec<&Value> = match config.get(*table) {
            Some(Value::Object(map)) => map.values().collect(),
            Some(Value::Array(items)) => items.iter().collect(),
            _ => continue,
        };
        cells.extend(
            entries
                .into_iter()
                .filter(|cell| cell.get("rf_port").and_then(Value::as_u64) == Some(u64::from(index)))
                .cloned(),
        );
    }
    cells
}

/// Milliseconds since the epoch as RFC 3339 UTC with milliseconds.
pub fn capture_date(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true))
}
