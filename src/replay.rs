use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{expand_path, ReplayConfig};

/// Write-only postmortem record for a terminal task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub task_id: String,
    pub input: Value,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    pub status: String,
}

/// Writes one JSON file per terminal task at `<dir>/<task_id>.json`
/// when replay is enabled.
pub struct ReplayWriter {
    dir: PathBuf,
    enabled: bool,
}

impl ReplayWriter {
    pub fn new(cfg: &ReplayConfig) -> Self {
        let dir = if cfg.dir.is_empty() {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".sypherd").join("replay")
        } else {
            PathBuf::from(expand_path(&cfg.dir))
        };
        Self {
            dir,
            enabled: cfg.enabled,
        }
    }

    pub fn write(&self, record: &ReplayRecord) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", record.task_id));
        let data = serde_json::to_vec_pretty(record)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
