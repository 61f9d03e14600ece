use super::layout::BundleLayout;
use super::plan::{ApplyPlan, PlannedStep};
use super::process::{self, CapturedRun, ProcessSpec};
use super::templates::import_templates;
use super::types::{ApplyStepOutcome, HardeningMode, StepName, StepVerbosity};
use crate::config::ApplyConfig;
use crate::util::sha256_hex;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const SCRIPT_DUMP_FILE: &str = "script.dump.txt";

/// W3C `traceparent` whose trace id is stable for the run and whose span id
/// is fresh for every step.
pub fn traceparent(run_id: &str) -> String {
    let trace_id = &sha256_hex(run_id.as_bytes())[..32];
    let span_id = &uuid::Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace_id}-{span_id}-01")
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Runs planned steps one at a time and turns every result, including
/// failures to start, into an [`ApplyStepOutcome`].
pub struct StepExecutor<'a> {
    pub config: &'a ApplyConfig,
    pub layout: &'a BundleLayout,
    pub plan: &'a ApplyPlan,
    pub run_id: &'a str,
    pub mode: HardeningMode,
    pub verbosity: StepVerbosity,
    pub cancel: &'a CancellationToken,
}

impl StepExecutor<'_> {
    fn env_for(&self, step: StepName) -> Vec<(String, String)> {
        let mut env = vec![
            ("TRACEPARENT".to_string(), traceparent(self.run_id)),
            ("STIGAPPLY_RUN_ID".to_string(), self.run_id.to_string()),
            ("STIGAPPLY_STEP".to_string(), step.as_str().to_string()),
            (
                "STIGAPPLY_BUNDLE_ROOT".to_string(),
                path_str(self.layout.root()),
            ),
            (
                "STIGAPPLY_LOG_DIR".to_string(),
                path_str(&self.layout.logs_dir()),
            ),
            (
                "STIGAPPLY_SNAPSHOT_DIR".to_string(),
                path_str(&self.layout.snapshots_dir()),
            ),
            (
                "STIGAPPLY_HARDENING_MODE".to_string(),
                self.mode.to_string(),
            ),
        ];
        if let Some(output) = self.plan.policy_output() {
            env.push(("STIGAPPLY_POLICY_OUTPUT".to_string(), path_str(output)));
        }
        if self.verbosity.for_step(step) {
            env.push(("STIGAPPLY_VERBOSE".to_string(), "1".to_string()));
        }
        env
    }

    fn process_spec(&self, planned: &PlannedStep) -> Option<ProcessSpec> {
        let step = planned.name();
        let launcher = self.config.launchers.for_step(step)?;
        let args = match planned {
            PlannedStep::PolicyCompile {
                module,
                data,
                output,
            } => {
                let module = path_str(module);
                let data = data.as_deref().map(path_str);
                let output = path_str(output);
                launcher.render(&[
                    ("module", Some(module.as_str())),
                    ("data", data.as_deref()),
                    ("output", Some(output.as_str())),
                ])
            }
            PlannedStep::Script { path } => {
                launcher.render(&[("path", Some(path_str(path).as_str()))])
            }
            PlannedStep::DeclarativeApply { manifest } => {
                launcher.render(&[("path", Some(path_str(manifest).as_str()))])
            }
            PlannedStep::LocalPolicyApply { object } => {
                launcher.render(&[("path", Some(path_str(object).as_str()))])
            }
            PlannedStep::TemplateImport { .. } => return None,
        };

        Some(ProcessSpec {
            program: launcher.program.clone(),
            args,
            env: self.env_for(step),
            cwd: Some(self.layout.root().to_path_buf()),
            timeout: self
                .config
                .timeouts
                .for_step(step)
                .unwrap_or(FALLBACK_TIMEOUT),
        })
    }

    async fn prepare(&self, planned: &PlannedStep) {
        match planned {
            PlannedStep::PolicyCompile { output, .. } => {
                if let Err(error) = tokio::fs::create_dir_all(output).await {
                    tracing::warn!(output = %output.display(), "failed creating policy output dir: {error}");
                }
            }
            PlannedStep::Script { path } => {
                let dump = self.layout.logs_dir().join(SCRIPT_DUMP_FILE);
                if let Err(error) = tokio::fs::copy(path, &dump).await {
                    tracing::debug!(script = %path.display(), "script dump skipped: {error}");
                }
            }
            _ => {}
        }
    }

    async fn run_templates(&self, root: &Path) -> CapturedRun {
        match import_templates(
            root,
            &self.layout.templates_dir(),
            &self.config.template_extensions,
            self.cancel,
        )
        .await
        {
            Ok(import) => CapturedRun {
                exit_code: import.exit_code(),
                error: import
                    .copied
                    .is_empty()
                    .then(|| format!("no template files found under {}", root.display())),
                stdout: import.listing().into_bytes(),
                ..CapturedRun::default()
            },
            Err(error) => CapturedRun {
                exit_code: 1,
                error: Some(format!("{error:#}")),
                stderr: format!("{error:#}\n").into_bytes(),
                ..CapturedRun::default()
            },
        }
    }

    pub async fn execute(&self, planned: &PlannedStep) -> ApplyStepOutcome {
        let step = planned.name();
        let started_at = Utc::now();
        self.prepare(planned).await;

        let run = match planned {
            PlannedStep::TemplateImport { root } => self.run_templates(root).await,
            _ => match self.process_spec(planned) {
                Some(spec) => process::run_captured(&spec).await,
                None => CapturedRun {
                    exit_code: process::SPAWN_FAILURE_EXIT_CODE,
                    error: Some(format!("no launcher configured for {step}")),
                    ..CapturedRun::default()
                },
            },
        };
        let finished_at = Utc::now();

        if self.verbosity.for_step(step) {
            tracing::debug!(
                step = %step,
                stdout = %String::from_utf8_lossy(&run.stdout),
                stderr = %String::from_utf8_lossy(&run.stderr),
                "step output"
            );
        }

        let stdout_path =
            process::write_stream(&self.layout.step_log_path(step.as_str(), "stdout"), &run.stdout)
                .await;
        let stderr_path =
            process::write_stream(&self.layout.step_log_path(step.as_str(), "stderr"), &run.stderr)
                .await;

        if run.exit_code != 0 {
            tracing::warn!(
                run_id = self.run_id,
                step = %step,
                exit_code = run.exit_code,
                timed_out = run.timed_out,
                error = run.error.as_deref().unwrap_or(""),
                "step failed"
            );
        }

        ApplyStepOutcome {
            step,
            exit_code: run.exit_code,
            started_at,
            finished_at,
            stdout_path,
            stderr_path,
            timed_out: run.timed_out,
            error: run.error,
            evidence_metadata_path: None,
            artifact_hash: None,
            continuity: None,
        }
    }
}
