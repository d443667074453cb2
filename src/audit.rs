use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::config::expand_path;

const OUTPUT_SUMMARY_MAX: usize = 200;

/// Append-only per-task command audit log. One text file per task at
/// `<dir>/<task_id>.log`.
pub struct AuditLogger {
    dir: PathBuf,
    write_lock: Mutex<()>,
    /// Integrity scheme tag; "none" today, the hook exists for external
    /// algorithm selection.
    #[allow(dead_code)]
    integrity: String,
}

impl AuditLogger {
    pub fn new(dir: &str, integrity: &str) -> Self {
        let dir = PathBuf::from(expand_path(dir));
        let _ = std::fs::create_dir_all(&dir);
        Self {
            dir,
            write_lock: Mutex::new(()),
            integrity: if integrity.is_empty() {
                "none".to_string()
            } else {
                integrity.to_string()
            },
        }
    }

    /// Append a command record for a task.
    pub fn log_command(
        &self,
        task_id: &str,
        tool_call_id: &str,
        command: &str,
        cwd: &str,
        exit_code: i32,
        output_summary: &str,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().expect("audit lock poisoned");

        let path = self.task_log_path(task_id);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?;

        let ts = Utc::now().to_rfc3339();
        let line = format!(
            "[{}] [{}] {} | exec | cmd={:?} cwd={:?} exit={} | {}\n",
            task_id,
            tool_call_id,
            ts,
            command,
            cwd,
            exit_code,
            truncate(output_summary, OUTPUT_SUMMARY_MAX),
        );
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn task_log_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.log", task_id))
    }

    #[allow(dead_code)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_command_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().to_str().unwrap(), "none");

        logger
            .log_command("t1", "call_1", "echo hi", "/ws", 0, "hi\n")
            .unwrap();
        logger
            .log_command("t1", "call_2", "false", "/ws", 1, "")
            .unwrap();

        let content = std::fs::read_to_string(logger.task_log_path("t1")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[t1] [call_1]"));
        assert!(lines[0].contains("| exec |"));
        assert!(lines[0].contains("cmd=\"echo hi\""));
        assert!(lines[0].contains("exit=0"));
        assert!(lines[1].contains("exit=1"));
    }

    #[test]
    fn separate_files_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().to_str().unwrap(), "none");
        logger.log_command("a", "c1", "ls", "/ws", 0, "").unwrap();
        logger.log_command("b", "c1", "ls", "/ws", 0, "").unwrap();
        assert!(logger.task_log_path("a").exists());
        assert!(logger.task_log_path("b").exists());
    }

    #[test]
    fn long_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().to_str().unwrap(), "none");
        let big = "x".repeat(1000);
        logger.log_command("t1", "c1", "cmd", "/ws", 0, &big).unwrap();
        let content = std::fs::read_to_string(logger.task_log_path("t1")).unwrap();
        assert!(content.contains("..."));
        assert!(content.len() < 600);
    }
}
