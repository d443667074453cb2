use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};

/// Simple counter registry for the runtime.
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    tool_calls_total: HashMap<String, u64>,
    tool_errors_total: HashMap<String, u64>,
    llm_requests_total: HashMap<String, u64>,
    task_completed: u64,
    task_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn inc_tool_call(&self, tool: &str) {
        let mut m = self.inner.lock().expect("metrics lock poisoned");
        *m.tool_calls_total.entry(tool.to_string()).or_default() += 1;
    }

    pub fn inc_tool_error(&self, tool: &str) {
        let mut m = self.inner.lock().expect("metrics lock poisoned");
        *m.tool_errors_total.entry(tool.to_string()).or_default() += 1;
    }

    pub fn inc_llm_request(&self, provider: &str) {
        let mut m = self.inner.lock().expect("metrics lock poisoned");
        *m.llm_requests_total.entry(provider.to_string()).or_default() += 1;
    }

    pub fn inc_task_completed(&self) {
        self.inner.lock().expect("metrics lock poisoned").task_completed += 1;
    }

    pub fn inc_task_failed(&self) {
        self.inner.lock().expect("metrics lock poisoned").task_failed += 1;
    }

    /// JSON snapshot for `GET /metrics`.
    pub fn snapshot(&self) -> Value {
        let m = self.inner.lock().expect("metrics lock poisoned");
        json!({
            "tool_calls_total": m.tool_calls_total,
            "tool_errors_total": m.tool_errors_total,
            "llm_requests_total": m.llm_requests_total,
            "task_completed": m.task_completed,
            "task_failed": m.task_failed,
        })
    }

    /// Prometheus text exposition for `GET /metrics?format=prometheus`.
    pub fn prometheus_format(&self) -> String {
        let m = self.inner.lock().expect("metrics lock poisoned");
        let mut out = String::new();

        out.push_str("# HELP sypher_task_completed Total completed tasks\n");
        out.push_str("# TYPE sypher_task_completed counter\n");
        out.push_str(&format!("sypher_task_completed {}\n", m.task_completed));
        out.push_str("# HELP sypher_task_failed Total failed tasks\n");
        out.push_str("# TYPE sypher_task_failed counter\n");
        out.push_str(&format!("sypher_task_failed {}\n", m.task_failed));

        out.push_str("# HELP sypher_tool_calls_total Total tool calls by tool\n");
        out.push_str("# TYPE sypher_tool_calls_total counter\n");
        let mut tools: Vec<&String> = m.tool_calls_total.keys().collect();
        tools.sort();
        for tool in tools {
            out.push_str(&format!(
                "sypher_tool_calls_total{{tool=\"{}\"}} {}\n",
                tool, m.tool_calls_total[tool]
            ));
        }

        out.push_str("# HELP sypher_tool_errors_total Total tool errors by tool\n");
        out.push_str("# TYPE sypher_tool_errors_total counter\n");
        let mut tools: Vec<&String> = m.tool_errors_total.keys().collect();
        tools.sort();
        for tool in tools {
            out.push_str(&format!(
                "sypher_tool_errors_total{{tool=\"{}\"}} {}\n",
                tool, m.tool_errors_total[tool]
            ));
        }

        out.push_str("# HELP sypher_llm_requests_total Total LLM requests by provider\n");
        out.push_str("# TYPE sypher_llm_requests_total counter\n");
        let mut providers: Vec<&String> = m.llm_requests_total.keys().collect();
        providers.sort();
        for provider in providers {
            out.push_str(&format!(
                "sypher_llm_requests_total{{provider=\"{}\"}} {}\n",
                provider, m.llm_requests_total[provider]
            ));
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
