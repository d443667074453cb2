use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{json, Value};

/// Named health checks aggregated into an overall status:
/// "ok" when every check reports ok, else "degraded".
pub struct HealthChecker {
    checks: RwLock<HashMap<String, String>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, name: &str, status: &str) {
        self.checks
            .write()
            .expect("health lock poisoned")
            .insert(name.to_string(), status.to_string());
    }

    pub fn report(&self) -> Value {
        let checks = self.checks.read().expect("health lock poisoned").clone();
        let status = if checks.values().all(|v| v == "ok") {
            "ok"
        } else {
            "degraded"
        };
        json!({ "status": status, "checks": checks })
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_checker_is_ok() {
        let h = HealthChecker::new();
        assert_eq!(h.report()["status"], "ok");
    }

    #[test]
    fn any_failing_check_degrades() {
        let h = HealthChecker::new();
        h.set("bus", "ok");
        h.set("provider", "error: no key");
        let report = h.report();
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["checks"]["bus"], "ok");
    }

    #[test]
    fn set_overwrites() {
        let h = HealthChecker::new();
        h.set("bus", "error");
        h.set("bus", "ok");
        assert_eq!(h.report()["status"], "ok");
    }
}
