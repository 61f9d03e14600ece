use crate::apply::process::{ProcessSpec, run_captured};
use crate::config::PreflightConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct PreflightRequest {
    pub bundle_root: PathBuf,
    /// Overrides `[preflight] script` for this invocation.
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightResult {
    pub ok: bool,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub exit_code: i32,
}

/// Structured report a readiness script may print on standard-out.
#[derive(Debug, Deserialize)]
struct PreflightReport {
    ok: bool,
    #[serde(default)]
    issues: Vec<String>,
}

fn parse_report(stdout: &str) -> Option<PreflightReport> {
    let trimmed = stdout.trim();
    if let Ok(report) = serde_json::from_str(trimmed) {
        return Some(report);
    }
    // Scripts often log before printing the report; accept a trailing JSON line.
    trimmed
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .and_then(|line| serde_json::from_str(line.trim()).ok())
}

/// Invokes the external readiness check. The script decides what "ready"
/// means; this runner only bounds and interprets it.
pub struct PreflightRunner {
    config: PreflightConfig,
}

impl PreflightRunner {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    fn resolve_script(&self, request: &PreflightRequest) -> Option<PathBuf> {
        let script = request
            .script
            .clone()
            .or_else(|| self.config.script_path())?;
        Some(if script.is_absolute() {
            script
        } else {
            request.bundle_root.join(script)
        })
    }

    pub async fn run_preflight(&self, request: &PreflightRequest) -> PreflightResult {
        let timestamp = Utc::now();
        let failed = |exit_code: i32, issue: String| PreflightResult {
            ok: false,
            issues: vec![issue],
            timestamp,
            exit_code,
        };

        let Some(script) = self.resolve_script(request) else {
            return failed(-1, "no preflight script configured".into());
        };
        if !script.is_file() {
            return failed(
                -1,
                format!("preflight script not found: {}", script.display()),
            );
        }

        let spec = ProcessSpec {
            program: self.config.interpreter.clone(),
            args: vec![script.to_string_lossy().into_owned()],
            env: vec![(
                "STIGAPPLY_BUNDLE_ROOT".into(),
                request.bundle_root.to_string_lossy().into_owned(),
            )],
            cwd: Some(request.bundle_root.clone()).filter(|dir| dir.is_dir()),
            timeout: self.config.timeout(),
        };
        let run = run_captured(&spec).await;

        if run.timed_out {
            return failed(
                run.exit_code,
                format!(
                    "preflight timed out after {}s and was terminated",
                    self.config.timeout_secs
                ),
            );
        }
        if let Some(error) = run.error {
            return failed(run.exit_code, error);
        }

        let stdout = String::from_utf8_lossy(&run.stdout);
        let result = match parse_report(&stdout) {
            Some(report) => PreflightResult {
                ok: report.ok,
                issues: report.issues,
                timestamp,
                exit_code: run.exit_code,
            },
            None => {
                let mut issues = Vec::new();
                if run.exit_code != 0 {
                    let stderr = String::from_utf8_lossy(&run.stderr);
                    let detail = stderr.trim();
                    issues.push(if detail.is_empty() {
                        format!("preflight exited with code {}", run.exit_code)
                    } else {
                        format!("preflight exited with code {}: {detail}", run.exit_code)
                    });
                }
                PreflightResult {
                    ok: run.exit_code == 0,
                    issues,
                    timestamp,
                    exit_code: run.exit_code,
                }
            }
        };

        tracing::info!(
            script = %script.display(),
            ok = result.ok,
            issues = result.issues.len(),
            exit_code = result.exit_code,
            "preflight.finished"
        );
        result
    }
}
