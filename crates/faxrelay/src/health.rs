use std::fmt;
use std::path::Path;

use crate::notify::Notifier;
use crate::worker::check_directory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn from_result<E: fmt::Display>(name: &'static str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                passed: true,
                detail: "ok".to_string(),
            },
            Err(e) => Self {
                name,
                passed: false,
                detail: e.to_string(),
            },
        }
    }
}

/// Outcome of the operator-facing checks: the watch directory is readable
/// and the mail server accepts a connection and login.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn run(watch_directory: &Path, notifier: &dyn Notifier) -> Self {
        let checks = vec![
            CheckResult::from_result("watch_directory", check_directory(watch_directory)),
            CheckResult::from_result("smtp", notifier.self_test()),
        ];
        for check in &checks {
            if check.passed {
                tracing::info!(check = check.name, "health check passed");
            } else {
                tracing::error!(check = check.name, detail = %check.detail, "health check failed");
            }
        }
        Self { checks }
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            writeln!(f, "{:<16} {}  {}", check.name, status, check.detail)?;
        }
        Ok(())
    }
}
