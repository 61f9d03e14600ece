use super::executor::StepExecutor;
use super::layout::BundleLayout;
use super::lock::BundleLock;
use super::plan::ApplyPlan;
use super::summary::{
    load_prior_step_hashes, load_resumed_outcomes, persist_summary, read_latest_summary,
};
use super::types::{
    ApplyRequest, ApplyResult, ApplyStepOutcome, FailedStep, HardeningMode, StepName,
};
use crate::collaborators::{
    ApplyConfiguration, AuditEntry, AuditTrail, ConfigurationManager, ConfigurationState,
    FileAuditTrail, FileSnapshotService, InMemoryConfigurationManager, SnapshotService,
};
use crate::config::{ApplyConfig, Config};
use crate::convergence::{
    AuditStatus, BlockingFailureReport, ConvergenceInput, ConvergenceStatus, MAX_REBOOT_COUNT,
    RecoveryArtifact, classify, collect_blocking_failures,
};
use crate::error::ApplyError;
use crate::evidence::{EvidenceCollector, FileEvidenceCollector, StepEvidenceTracker};
use crate::observability::{ApplyEvent, ApplyObserver, create_observer};
use crate::reboot::{
    FlagFileRebootProbe, REBOOT_CONTEXT_VERSION, RebootContext, RebootCoordinator, RebootProbe,
};
use crate::util::is_valid_run_id;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Services the runner consumes but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub snapshots: Arc<dyn SnapshotService>,
    pub config_manager: Arc<dyn ConfigurationManager>,
    pub evidence: Arc<dyn EvidenceCollector>,
    /// `None` means no audit trail is reachable; runs are then blocked.
    pub audit: Option<Arc<dyn AuditTrail>>,
    pub reboot_probe: Arc<dyn RebootProbe>,
    pub observer: Arc<dyn ApplyObserver>,
}

impl Collaborators {
    /// File-backed defaults scoped to one bundle.
    pub fn file_backed(config: &Config, bundle_root: &Path) -> Self {
        let layout = BundleLayout::new(bundle_root);
        Self {
            snapshots: Arc::new(FileSnapshotService::new()),
            config_manager: Arc::new(InMemoryConfigurationManager::new()),
            evidence: Arc::new(FileEvidenceCollector::new()),
            audit: Some(Arc::new(FileAuditTrail::new(layout.audit_path()))),
            reboot_probe: Arc::new(FlagFileRebootProbe::new(
                config.reboot.resolved_flag_paths(),
            )),
            observer: create_observer(&config.observability),
        }
    }
}

pub struct ApplyRunner {
    config: ApplyConfig,
    collaborators: Collaborators,
}

#[derive(serde::Deserialize)]
struct BundleManifest {
    #[serde(alias = "hardeningMode")]
    hardening_mode: Option<String>,
}

fn manifest_mode(layout: &BundleLayout) -> Option<HardeningMode> {
    let path = layout.manifest_path();
    let raw = std::fs::read_to_string(&path).ok()?;
    let manifest: BundleManifest = match serde_json::from_str(&raw) {
        Ok(manifest) => manifest,
        Err(error) => {
            tracing::warn!(path = %path.display(), "bundle manifest unreadable: {error}");
            return None;
        }
    };
    let value = manifest.hardening_mode?;
    match HardeningMode::from_str(value.trim()) {
        Ok(mode) => Some(mode),
        Err(_) => {
            tracing::warn!(path = %path.display(), mode = %value, "unknown hardening mode in manifest");
            None
        }
    }
}

fn resolve_bundle_root(requested: &Path) -> Result<PathBuf, ApplyError> {
    if requested.as_os_str().is_empty() {
        return Err(ApplyError::BundleRootMissing(requested.to_path_buf()));
    }
    match std::fs::canonicalize(requested) {
        Ok(root) if root.is_dir() => Ok(root),
        _ => Err(ApplyError::BundleRootMissing(requested.to_path_buf())),
    }
}

fn resolve_run_id(request: &ApplyRequest) -> Result<String, ApplyError> {
    if let Some(prior) = &request.prior_run_id
        && !is_valid_run_id(prior)
    {
        return Err(ApplyError::InvalidRequest(format!(
            "prior run id '{prior}' may only contain letters, digits, '.', '_' and '-'"
        )));
    }
    match &request.run_id {
        Some(run_id) if is_valid_run_id(run_id) => Ok(run_id.clone()),
        Some(run_id) => Err(ApplyError::InvalidRequest(format!(
            "run id '{run_id}' may only contain letters, digits, '.', '_' and '-'"
        ))),
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

fn policy_compile_failed(outcomes: &[ApplyStepOutcome], carried: &[FailedStep]) -> bool {
    outcomes
        .iter()
        .any(|outcome| outcome.step == StepName::PolicyCompile && !outcome.succeeded())
        || carried
            .iter()
            .any(|failed| failed.step == StepName::PolicyCompile)
}

fn failed_steps(outcomes: &[ApplyStepOutcome], carried: &[FailedStep]) -> Vec<FailedStep> {
    carried
        .iter()
        .copied()
        .chain(
            outcomes
                .iter()
                .filter(|outcome| !outcome.succeeded())
                .map(|outcome| FailedStep {
                    step: outcome.step,
                    exit_code: outcome.exit_code,
                }),
        )
        .collect()
}

impl ApplyRunner {
    pub fn new(config: ApplyConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub async fn run(&self, request: &ApplyRequest) -> Result<ApplyResult, ApplyError> {
        self.run_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// One apply attempt. Step failures are recorded in the result; only
    /// precondition, resume, cancellation and blocking failures are errors.
    pub async fn run_with_cancel(
        &self,
        request: &ApplyRequest,
        cancel: &CancellationToken,
    ) -> Result<ApplyResult, ApplyError> {
        let bundle_root = resolve_bundle_root(&request.bundle_root)?;
        let layout = BundleLayout::new(&bundle_root);
        layout.ensure_dirs()?;
        let run_id = resolve_run_id(request)?;
        let _lock = BundleLock::acquire(&layout.lock_path(), &run_id)?;

        let mode = request
            .mode_override
            .or_else(|| manifest_mode(&layout))
            .unwrap_or_default();
        let prior_hashes = load_prior_step_hashes(&layout, request.prior_run_id.as_deref());
        let audit_anchor = read_latest_summary(&layout).and_then(|summary| summary.audit_head);
        let plan = ApplyPlan::from_request(request, &layout);
        let planned = plan.names();

        let coordinator = RebootCoordinator::new(
            layout.checkpoint_path(),
            Arc::clone(&self.collaborators.reboot_probe),
        );
        let resumed = coordinator.resume_after_reboot(&bundle_root, &planned)?;
        let (mut completed, carried, reboot_count, resumed_outcomes) = match resumed {
            Some(context) => {
                let outcomes = load_resumed_outcomes(
                    &layout,
                    context.run_id.as_deref(),
                    &context.completed_steps,
                );
                (
                    context.completed_steps,
                    context.failed_steps,
                    context.reboot_count,
                    outcomes,
                )
            }
            None => (Vec::new(), Vec::new(), 0, Vec::new()),
        };

        let observer = self.collaborators.observer.as_ref();
        observer.record_event(&ApplyEvent::RunStarted {
            run_id: run_id.clone(),
            bundle_root: bundle_root.display().to_string(),
            mode: mode.to_string(),
            planned: planned.len(),
        });

        let captured_lcm = if plan.contains(StepName::DeclarativeApply)
            && !completed.contains(&StepName::DeclarativeApply)
        {
            Some(self.prepare_configuration_manager(mode).await?)
        } else {
            None
        };

        let mut result = ApplyResult {
            run_id: run_id.clone(),
            prior_run_id: request.prior_run_id.clone(),
            bundle_root: bundle_root.clone(),
            mode,
            log_path: layout.summary_path(),
            steps: Vec::new(),
            snapshot_id: None,
            snapshot_dir: None,
            rollback_script: None,
            is_mission_complete: false,
            integrity_verified: false,
            blocking_failures: Vec::new(),
            recovery_artifacts: Vec::new(),
            reboot_count,
            reboot_pending: false,
            resumed_steps: completed.clone(),
            resumed_outcomes,
            skipped_steps: Vec::new(),
            convergence: ConvergenceStatus::NotApplicable,
            audit_head: audit_anchor,
        };

        if request.skip_snapshot {
            tracing::warn!(run_id = %run_id, "pre-apply snapshot skipped by request");
        } else {
            let snapshots = self.collaborators.snapshots.as_ref();
            let snapshot = snapshots.create_snapshot(&layout.snapshots_dir()).await?;
            let rollback = snapshots.generate_rollback_script(&snapshot).await?;
            tracing::info!(
                run_id = %run_id,
                snapshot_id = %snapshot.snapshot_id,
                rollback = %rollback.display(),
                "pre-apply snapshot taken"
            );
            result.snapshot_id = Some(snapshot.snapshot_id);
            result.snapshot_dir = Some(snapshot.path);
            result.rollback_script = Some(rollback);
        }

        let executor = StepExecutor {
            config: &self.config,
            layout: &layout,
            plan: &plan,
            run_id: &run_id,
            mode,
            verbosity: request.verbosity,
            cancel,
        };
        let tracker = StepEvidenceTracker::new(
            self.collaborators.evidence.as_ref(),
            &prior_hashes,
            &bundle_root,
            &run_id,
        );

        for (index, planned_step) in plan.steps().iter().enumerate() {
            let step = planned_step.name();
            if completed.contains(&step) {
                continue;
            }
            if step == StepName::DeclarativeApply && policy_compile_failed(&result.steps, &carried)
            {
                result.skipped_steps.push(step);
                observer.record_event(&ApplyEvent::StepSkipped {
                    run_id: run_id.clone(),
                    step,
                    reason: "policy-compile failed; nothing compiled to apply".into(),
                });
                continue;
            }
            if cancel.is_cancelled() {
                let remaining: Vec<StepName> = planned[index..]
                    .iter()
                    .filter(|step| !completed.contains(step))
                    .copied()
                    .collect();
                self.restore_configuration_manager(request, captured_lcm.as_ref())
                    .await;
                persist_summary(&layout, &result)?;
                tracing::warn!(run_id = %run_id, remaining = remaining.len(), "apply run cancelled");
                return Err(ApplyError::Cancelled { remaining });
            }

            observer.record_event(&ApplyEvent::StepStarted {
                run_id: run_id.clone(),
                step,
            });
            let clock = Instant::now();
            let mut outcome = executor.execute(planned_step).await;
            tracker.record(&mut outcome).await;
            observer.record_event(&ApplyEvent::StepFinished {
                run_id: run_id.clone(),
                step,
                exit_code: outcome.exit_code,
                duration: clock.elapsed(),
                timed_out: outcome.timed_out,
            });
            result.steps.push(outcome);
            completed.push(step);

            if step.may_require_reboot() && coordinator.detect_reboot_required() {
                let next_index = (index + 1).min(plan.len() - 1);
                let context = RebootContext {
                    version: REBOOT_CONTEXT_VERSION,
                    bundle_root: bundle_root.clone(),
                    current_step_index: next_index,
                    completed_steps: completed.clone(),
                    failed_steps: failed_steps(&result.steps, &carried),
                    planned_steps: planned.clone(),
                    scheduled_at: Utc::now(),
                    reboot_count: reboot_count.saturating_add(1),
                    run_id: Some(run_id.clone()),
                };
                coordinator.schedule_reboot(&context)?;

                result.reboot_pending = true;
                result.reboot_count = context.reboot_count;
                result.convergence = classify(ConvergenceInput {
                    step_count: result.steps.len() + result.resumed_steps.len(),
                    any_step_failed: !context.failed_steps.is_empty(),
                    reboot_pending: true,
                    reboot_count: context.reboot_count,
                    max_reboot_count: MAX_REBOOT_COUNT,
                });
                persist_summary(&layout, &result)?;
                observer.record_event(&ApplyEvent::RebootScheduled {
                    run_id: run_id.clone(),
                    next_step: planned[next_index],
                    reboot_count: context.reboot_count,
                });
                return Ok(result);
            }
        }

        self.restore_configuration_manager(request, captured_lcm.as_ref())
            .await;

        let all_failures = failed_steps(&result.steps, &carried);
        result.convergence = classify(ConvergenceInput {
            step_count: result.steps.len() + result.resumed_steps.len(),
            any_step_failed: !all_failures.is_empty(),
            reboot_pending: false,
            reboot_count,
            max_reboot_count: MAX_REBOOT_COUNT,
        });

        let (audit, head) = self.audit(&result).await;
        result.integrity_verified = audit.is_verified();
        if let Some(head) = head {
            result.audit_head = Some(head);
        }
        let failures = collect_blocking_failures(&result.steps, &carried, &audit);

        let mut artifacts = Vec::new();
        if let Some(rollback) = &result.rollback_script {
            artifacts.push(RecoveryArtifact::new("rollback script", rollback));
        }
        if let Some(dir) = &result.snapshot_dir {
            artifacts.push(RecoveryArtifact::new("snapshot directory", dir));
        }
        artifacts.push(RecoveryArtifact::new("run summary", &result.log_path));

        result.blocking_failures.clone_from(&failures);
        result.recovery_artifacts = artifacts.iter().map(|a| a.path.clone()).collect();
        result.is_mission_complete = failures.is_empty();
        persist_summary(&layout, &result)?;

        observer.record_event(&ApplyEvent::RunFinished {
            run_id: run_id.clone(),
            convergence: format!("{:?}", result.convergence),
            mission_complete: result.is_mission_complete,
            blocking_failures: failures.len(),
        });

        if failures.is_empty() {
            return Ok(result);
        }

        let report = BlockingFailureReport {
            run_id,
            bundle_root,
            failures,
            recovery_artifacts: artifacts,
            snapshot_taken: result.snapshot_id.is_some(),
        };
        Err(ApplyError::Blocked {
            report,
            result: Box::new(result),
        })
    }

    async fn prepare_configuration_manager(
        &self,
        mode: HardeningMode,
    ) -> Result<ConfigurationState, ApplyError> {
        let manager = self.collaborators.config_manager.as_ref();
        let state = manager.get_state().await?;
        manager
            .configure(&ApplyConfiguration::for_mode(mode))
            .await?;
        tracing::info!(manager = manager.name(), mode = %mode, "configuration manager prepared");
        Ok(state)
    }

    async fn restore_configuration_manager(
        &self,
        request: &ApplyRequest,
        captured: Option<&ConfigurationState>,
    ) {
        let wanted = request
            .restore_configuration_manager
            .unwrap_or(self.config.restore_configuration_manager);
        let Some(state) = captured.filter(|_| wanted) else {
            return;
        };
        if let Err(error) = self.collaborators.config_manager.reset(state).await {
            tracing::warn!("configuration manager reset failed (non-fatal): {error}");
            self.collaborators
                .observer
                .record_event(&ApplyEvent::Error {
                    component: "configuration-manager".into(),
                    message: error.to_string(),
                });
        }
    }

    /// Record the run and verify the trail against the anchor carried in
    /// `result.audit_head`. Returns the new head only when verification passed.
    async fn audit(&self, result: &ApplyResult) -> (AuditStatus, Option<String>) {
        let Some(trail) = self.collaborators.audit.as_ref() else {
            tracing::warn!(run_id = %result.run_id, "no audit trail available");
            return (AuditStatus::Unavailable, None);
        };

        let steps: Vec<serde_json::Value> = result
            .steps
            .iter()
            .map(|outcome| {
                serde_json::json!({
                    "step": outcome.step,
                    "exit_code": outcome.exit_code,
                    "artifact_hash": outcome.artifact_hash,
                    "continuity": outcome.continuity,
                })
            })
            .collect();
        let entry = AuditEntry::new(&result.run_id, "apply.completed").with_detail(
            serde_json::json!({
                "bundle_root": result.bundle_root,
                "mode": result.mode,
                "prior_run_id": result.prior_run_id,
                "convergence": result.convergence,
                "resumed_steps": result.resumed_steps,
                "steps": steps,
            }),
        );

        let head = match trail.record_entry(&entry).await {
            Ok(head) => head,
            Err(error) => return (AuditStatus::RecordFailed(format!("{error:#}")), None),
        };
        match trail.verify_integrity(result.audit_head.as_deref()).await {
            Ok(true) => (AuditStatus::Verified, Some(head)),
            Ok(false) => (AuditStatus::IntegrityFailed, None),
            Err(error) => (AuditStatus::VerifyFailed(format!("{error:#}")), None),
        }
    }
}
