use std::path::Path;

use serde::{Deserialize, Serialize};

/// Advisory task state snapshot for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub history_hash: String,
}

/// Write a checkpoint file. No-op when `dir` is empty.
pub fn write_checkpoint(dir: &str, task_id: &str, state: &str, history_hash: &str) -> anyhow::Result<()> {
    if dir.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    let path = Path::new(dir).join(format!("{}.checkpoint.json", task_id));
    let data = serde_json::to_vec(&Checkpoint {
        task_id: task_id.to_string(),
        state: state.to_string(),
        history_hash: history_hash.to_string(),
    })?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Remove a checkpoint file. No-op when `dir` is empty.
pub fn remove_checkpoint(dir: &str, task_id: &str) -> anyhow::Result<()> {
    if dir.is_empty() {
        return Ok(());
    }
    let path = Path::new(dir).join(format!("{}.checkpoint.json", task_id));
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
