use crate::apply_harness::TestBundle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stigapply::apply::{ApplyRequest, ApplyRunner, StepName};
use stigapply::collaborators::{
    ApplyConfiguration, CollabFuture, ConfigurationManager, ConfigurationState,
    InMemoryConfigurationManager, SnapshotInfo, SnapshotService,
};
use stigapply::config::ApplyConfig;
use stigapply::error::{ApplyError, ConfigManagerError, SnapshotError};

fn script_request(bundle: &TestBundle) -> ApplyRequest {
    let script = bundle.write("Scripts/harden.sh", "echo applied\n");
    let mut request = bundle.request();
    request.script_path = Some(script);
    request
}

#[tokio::test]
async fn missing_audit_trail_blocks_even_when_steps_pass() {
    let bundle = TestBundle::new();
    let mut collaborators = bundle.collaborators();
    collaborators.audit = None;
    let runner = ApplyRunner::new(ApplyConfig::default(), collaborators);

    let err = runner.run(&script_request(&bundle)).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run, got {text}");
    };
    assert!(text.contains("audit trail unavailable"));
    assert!(result.outcome(StepName::Script).unwrap().succeeded());
    assert!(!result.integrity_verified);
    assert!(!result.is_mission_complete);
}

#[tokio::test]
async fn audit_trail_accumulates_a_verified_chain() {
    let bundle = TestBundle::new();
    let request = script_request(&bundle);

    for _ in 0..3 {
        let result = bundle.runner().run(&request).await.unwrap();
        assert!(result.integrity_verified);
    }
    let trail = std::fs::read_to_string(bundle.layout().audit_path()).unwrap();
    assert_eq!(trail.lines().count(), 3);
    assert!(trail.lines().all(|line| line.contains("apply.completed")));
}

#[tokio::test]
async fn tampered_audit_trail_blocks_the_next_run() {
    let bundle = TestBundle::new();
    let request = script_request(&bundle);
    bundle.runner().run(&request).await.unwrap();

    let audit = bundle.layout().audit_path();
    let original = std::fs::read_to_string(&audit).unwrap();
    std::fs::write(&audit, original.replace("apply.completed", "apply.rewritten")).unwrap();

    let err = bundle.runner().run(&request).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run, got {text}");
    };
    assert!(text.contains("audit trail integrity check failed"));
    assert!(!result.integrity_verified);
    assert_eq!(result.blocking_failures.len(), 1);
}

fn blocked_reason(err: ApplyError) -> String {
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run, got {text}");
    };
    assert!(!result.integrity_verified);
    assert!(!result.is_mission_complete);
    text
}

#[tokio::test]
async fn deleted_audit_trail_blocks_the_next_run() {
    let bundle = TestBundle::new();
    let request = script_request(&bundle);
    let first = bundle.runner().run(&request).await.unwrap();
    assert!(first.audit_head.is_some());

    std::fs::remove_file(bundle.layout().audit_path()).unwrap();

    let text = blocked_reason(bundle.runner().run(&request).await.unwrap_err());
    assert!(text.contains("audit trail integrity check failed"));
}

#[tokio::test]
async fn truncated_audit_trail_blocks_the_next_run() {
    let bundle = TestBundle::new();
    let request = script_request(&bundle);
    bundle.runner().run(&request).await.unwrap();
    let second = bundle.runner().run(&request).await.unwrap();

    let audit = bundle.layout().audit_path();
    let full = std::fs::read_to_string(&audit).unwrap();
    let first_line = full.lines().next().unwrap();
    std::fs::write(&audit, format!("{first_line}\n")).unwrap();

    let text = blocked_reason(bundle.runner().run(&request).await.unwrap_err());
    assert!(text.contains("audit trail integrity check failed"));

    // A blocked run keeps the last verified anchor rather than adopting its own.
    let latest = stigapply::apply::read_latest_summary(&bundle.layout()).unwrap();
    assert_eq!(latest.audit_head, second.audit_head);
}

/// Configuration manager that fails the requested operations and otherwise
/// behaves like the in-memory one.
struct FailingConfigurationManager {
    inner: InMemoryConfigurationManager,
    fail_configure: bool,
    fail_reset: bool,
}

impl FailingConfigurationManager {
    fn new(fail_configure: bool, fail_reset: bool) -> Self {
        Self {
            inner: InMemoryConfigurationManager::new(),
            fail_configure,
            fail_reset,
        }
    }
}

impl ConfigurationManager for FailingConfigurationManager {
    fn name(&self) -> &str {
        "failing"
    }

    fn get_state(&self) -> CollabFuture<'_, Result<ConfigurationState, ConfigManagerError>> {
        self.inner.get_state()
    }

    fn configure<'a>(
        &'a self,
        config: &'a ApplyConfiguration,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>> {
        if self.fail_configure {
            return Box::pin(async {
                Err(ConfigManagerError::Configure("service not responding".into()))
            });
        }
        self.inner.configure(config)
    }

    fn reset<'a>(
        &'a self,
        state: &'a ConfigurationState,
    ) -> CollabFuture<'a, Result<(), ConfigManagerError>> {
        if self.fail_reset {
            return Box::pin(async { Err(ConfigManagerError::Reset("access denied".into())) });
        }
        self.inner.reset(state)
    }
}

#[tokio::test]
async fn configure_failure_aborts_before_snapshot_or_steps() {
    let bundle = TestBundle::new();
    let marker = bundle.marker("dsc-ran");
    let dsc = bundle.write("Policy/apply.sh", &format!("touch '{}'\n", marker.display()));
    let mut request = bundle.request();
    request.dsc_manifest_path = Some(dsc);

    let manager = Arc::new(FailingConfigurationManager::new(true, false));
    let err = ApplyRunner::new(ApplyConfig::default(), bundle.collaborators_with(manager))
        .run(&request)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApplyError::ConfigurationManager(ConfigManagerError::Configure(_))
    ));
    assert!(err.to_string().contains("service not responding"));
    assert!(!marker.exists());
    let snapshots = std::fs::read_dir(bundle.layout().snapshots_dir()).unwrap();
    assert_eq!(snapshots.count(), 0);
    assert!(!bundle.layout().lock_path().exists());
}

#[tokio::test]
async fn reset_failure_is_reported_but_not_fatal() {
    let bundle = TestBundle::new();
    let manager = Arc::new(FailingConfigurationManager::new(false, true));

    let result = ApplyRunner::new(
        ApplyConfig::default(),
        bundle.collaborators_with(manager.clone()),
    )
    .run(&declarative_request(&bundle, Some(true)))
    .await
    .unwrap();

    assert!(result.is_mission_complete);
    assert!(result.outcome(StepName::DeclarativeApply).unwrap().succeeded());
    assert_eq!(manager.inner.current().configuration_mode, "ApplyOnly");
}

fn declarative_request(bundle: &TestBundle, restore: Option<bool>) -> ApplyRequest {
    let dsc = bundle.write("Policy/apply.sh", "echo configured\n");
    let mut request = bundle.request();
    request.dsc_manifest_path = Some(dsc);
    request.restore_configuration_manager = restore;
    request
}

#[tokio::test]
async fn configuration_manager_is_restored_only_when_asked() {
    let bundle = TestBundle::new();

    let kept = Arc::new(InMemoryConfigurationManager::new());
    ApplyRunner::new(ApplyConfig::default(), bundle.collaborators_with(kept.clone()))
        .run(&declarative_request(&bundle, None))
        .await
        .unwrap();
    assert_eq!(kept.current().configuration_mode, "ApplyOnly");
    assert!(!kept.current().reboot_node_if_needed);

    let restored = Arc::new(InMemoryConfigurationManager::new());
    ApplyRunner::new(
        ApplyConfig::default(),
        bundle.collaborators_with(restored.clone()),
    )
    .run(&declarative_request(&bundle, Some(true)))
    .await
    .unwrap();
    assert_eq!(restored.current(), ConfigurationState::default());
}

#[tokio::test]
async fn configuration_manager_untouched_without_declarative_step() {
    let bundle = TestBundle::new();
    let manager = Arc::new(InMemoryConfigurationManager::new());
    ApplyRunner::new(
        ApplyConfig::default(),
        bundle.collaborators_with(manager.clone()),
    )
    .run(&script_request(&bundle))
    .await
    .unwrap();
    assert_eq!(manager.current(), ConfigurationState::default());
}

struct BrokenSnapshots;

impl SnapshotService for BrokenSnapshots {
    fn name(&self) -> &str {
        "broken"
    }

    fn create_snapshot<'a>(
        &'a self,
        dir: &'a Path,
    ) -> CollabFuture<'a, Result<SnapshotInfo, SnapshotError>> {
        Box::pin(async move {
            Err(SnapshotError::Create {
                dir: dir.to_path_buf(),
                message: "volume shadow copy unavailable".into(),
            })
        })
    }

    fn generate_rollback_script<'a>(
        &'a self,
        snapshot: &'a SnapshotInfo,
    ) -> CollabFuture<'a, Result<PathBuf, SnapshotError>> {
        Box::pin(async move {
            Err(SnapshotError::RollbackScript {
                snapshot_id: snapshot.snapshot_id.clone(),
                message: "unreachable".into(),
            })
        })
    }
}

#[tokio::test]
async fn snapshot_failure_aborts_before_any_step() {
    let bundle = TestBundle::new();
    let marker = bundle.marker("should-not-run");
    let script = bundle.write(
        "Scripts/harden.sh",
        &format!("touch '{}'\n", marker.display()),
    );
    let mut collaborators = bundle.collaborators();
    collaborators.snapshots = Arc::new(BrokenSnapshots);
    let runner = ApplyRunner::new(ApplyConfig::default(), collaborators);

    let mut request = bundle.request();
    request.script_path = Some(script);
    let err = runner.run(&request).await.unwrap_err();

    assert!(matches!(err, ApplyError::Snapshot(_)));
    assert!(err.to_string().contains("volume shadow copy unavailable"));
    assert!(!marker.exists());
    assert!(!bundle.layout().lock_path().exists());
}
