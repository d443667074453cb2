use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{expand_path, AppConfig};

use super::fs_utils;
use super::{Tool, ToolErrorCode, ToolRequest, ToolResponse};

const DEFAULT_LINES: u64 = 50;
const MAX_LINES: u64 = 1000;
const LLM_OUTPUT_CAP: usize = 8192;

/// Reads the last N lines from a file, honouring workspace restriction.
pub struct TailOutputTool {
    workspace: PathBuf,
    restrict_to_workspace: bool,
    safe_mode: bool,
}

impl TailOutputTool {
    pub fn new(cfg: &AppConfig, safe_mode: bool) -> Self {
        let workspace = {
            let ws = expand_path(&cfg.agents.defaults.workspace);
            if ws.is_empty() {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            } else {
                PathBuf::from(ws)
            }
        };
        Self {
            workspace,
            restrict_to_workspace: cfg.agents.defaults.restrict_to_workspace,
            safe_mode,
        }
    }
}

#[async_trait]
impl Tool for TailOutputTool {
    fn name(&self) -> &'static str {
        "tail_output"
    }

    fn description(&self) -> &str {
        "Read the last N lines from a file"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tail_output",
            "description": "Read the last N lines from a file. Use for live log monitoring.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path to read" },
                    "lines": { "type": "integer", "description": "Number of lines (default 50, max 1000)" }
                },
                "required": ["path"]
            }
        })
    }

    async fn execute(&self, req: ToolRequest) -> ToolResponse {
        if self.safe_mode {
            return ToolResponse::error(
                &req.tool_call_id,
                "tail_output disabled in safe mode",
                "Tail output is disabled in safe mode.",
                ToolErrorCode::PermissionDenied,
                false,
            );
        }

        let path = match req.arg_str("path") {
            Some(p) if !p.is_empty() => expand_path(p),
            _ => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Missing 'path' argument",
                    "Path is required.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let n = req
            .arg_u64("lines")
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_LINES)
            .min(MAX_LINES) as usize;

        if self.restrict_to_workspace {
            let abs = fs_utils::lexical_absolute(&path, &self.workspace);
            if fs_utils::escapes_root(&self.workspace, &abs) {
                return ToolResponse::error(
                    &req.tool_call_id,
                    "Path outside workspace",
                    "File path is outside the allowed workspace.",
                    ToolErrorCode::PermissionDenied,
                    false,
                );
            }
        }

        let content = match tokio::fs::read_to_string(Path::new(&path)).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResponse::error(
                    &req.tool_call_id,
                    &format!("Failed to open file: {}", e),
                    "Could not read file.",
                    ToolErrorCode::PermissionDenied,
                    false,
                )
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        let mut result = lines[start..].join("\n");
        if result.len() > LLM_OUTPUT_CAP {
            // Keep the tail, which is what the caller asked for.
            let mut begin = result.len() - LLM_OUTPUT_CAP;
            while begin < result.len() && !result.is_char_boundary(begin) {
                begin += 1;
            }
            result = format!("{}\n\n... (truncated)", &result[begin..]);
        }

        ToolResponse::success(
            &req.tool_call_id,
            result,
            format!("Last {} lines from {}", lines.len() - start, path),
            None,
        )
    }
}
