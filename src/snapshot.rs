//! Previous-run snapshot of the table source.
//!
//! The rows extracted on each run are stored with a timestamp so the next run
//! can tell whether the source page changed. The snapshot is informational:
//! a missing or corrupt file reads as empty and write failures are logged.

use crate::scrapers::table::TableRow;
use crate::utils::ensure_parent_dir;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{debug, instrument, warn};

pub const SNAPSHOT_FILE: &str = "previous_data.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub data: Vec<TableRow>,
}

impl Snapshot {
    pub fn has_changed(&self, rows: &[TableRow]) -> bool {
        self.data.as_slice() != rows
    }
}

#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn load_snapshot(path: &Path) -> Snapshot {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "No previous snapshot");
            return Snapshot::default();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(error = %e, "Previous snapshot is corrupt; ignoring it");
        Snapshot::default()
    })
}

#[instrument(level = "debug", skip_all, fields(path = %path.display(), rows = rows.len()))]
pub async fn save_snapshot(
    path: &Path,
    rows: &[TableRow],
    now: DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
    let snapshot = Snapshot {
        timestamp: Some(now),
        data: rows.to_vec(),
    };
    let json = serde_json::to_string_pretty(&snapshot)?;
    ensure_parent_dir(path).await?;
    fs::write(path, json).await?;
    Ok(())
}
