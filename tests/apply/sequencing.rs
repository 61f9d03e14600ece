use crate::apply_harness::TestBundle;
use stigapply::apply::process::TIMEOUT_EXIT_CODE;
use stigapply::apply::{ApplyRunner, HardeningMode, StepName};
use stigapply::config::ApplyConfig;
use stigapply::convergence::ConvergenceStatus;
use stigapply::error::ApplyError;

#[tokio::test]
async fn script_only_request_runs_exactly_the_script() {
    let bundle = TestBundle::new();
    let marker = bundle.marker("script-ran");
    let script = bundle.write(
        "Scripts/harden.sh",
        &format!("echo hardened\ntouch '{}'\n", marker.display()),
    );

    let mut request = bundle.request();
    request.script_path = Some(script);
    let result = bundle.runner().run(&request).await.unwrap();

    let steps: Vec<StepName> = result.steps.iter().map(|o| o.step).collect();
    assert_eq!(steps, vec![StepName::Script]);
    assert!(result.outcome(StepName::DeclarativeApply).is_none());
    assert!(marker.exists());
    assert!(result.is_mission_complete);
    assert!(result.integrity_verified);
    assert!(result.blocking_failures.is_empty());
    assert_eq!(result.convergence, ConvergenceStatus::Converged);
    assert_eq!(result.mode, HardeningMode::Safe);

    let rollback = result.rollback_script.as_ref().unwrap();
    assert!(rollback.is_file());
    assert!(result.snapshot_dir.as_ref().unwrap().is_dir());

    let layout = bundle.layout();
    assert!(layout.summary_path().is_file());
    assert!(layout.archived_summary_path(&result.run_id).is_file());
    assert!(!layout.lock_path().exists(), "lock must be released");
    assert!(!layout.checkpoint_path().exists());

    let stdout = std::fs::read_to_string(result.steps[0].stdout_path.as_ref().unwrap()).unwrap();
    assert_eq!(stdout, "hardened\n");
}

#[tokio::test]
async fn failed_policy_compile_skips_declarative_apply() {
    let bundle = TestBundle::new();
    let dsc_marker = bundle.marker("dsc-ran");
    let compiler = bundle.write("Policy/compile.sh", "echo 'compile error' >&2\nexit 3\n");
    let dsc = bundle.write(
        "Policy/apply.sh",
        &format!("touch '{}'\n", dsc_marker.display()),
    );

    let mut request = bundle.request();
    request.policy_module_path = Some(compiler);
    request.dsc_manifest_path = Some(dsc);

    let err = bundle.runner().run(&request).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run, got {text}");
    };

    assert!(result.outcome(StepName::DeclarativeApply).is_none());
    assert_eq!(result.skipped_steps, vec![StepName::DeclarativeApply]);
    assert_eq!(result.outcome(StepName::PolicyCompile).unwrap().exit_code, 3);
    assert!(!dsc_marker.exists());
    assert!(text.contains("policy-compile"));
    assert!(text.contains("code 3"));
    assert!(!result.is_mission_complete);
}

#[tokio::test]
async fn blocking_error_names_failures_and_recovery_artifacts() {
    let bundle = TestBundle::new();
    let script = bundle.write("Scripts/harden.sh", "exit 5\n");

    let mut request = bundle.request();
    request.script_path = Some(script);

    let err = bundle.runner().run(&request).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { report, result } = err else {
        panic!("expected a blocked run, got {text}");
    };

    assert!(text.contains("step 'script' exited with code 5"));
    assert!(text.contains(&result.rollback_script.as_ref().unwrap().display().to_string()));
    assert!(text.contains(&result.snapshot_dir.as_ref().unwrap().display().to_string()));
    assert!(text.contains(&bundle.layout().summary_path().display().to_string()));
    assert!(text.contains("Rollback is never automatic"));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(result.convergence, ConvergenceStatus::Diverged);

    // The blocked run is still recorded for the operator.
    let summary = std::fs::read_to_string(bundle.layout().summary_path()).unwrap();
    assert!(summary.contains("exited with code 5"));
    assert!(!bundle.layout().lock_path().exists());
}

#[tokio::test]
async fn timed_out_step_is_killed_and_blocks() {
    let bundle = TestBundle::new();
    let script = bundle.write("Scripts/slow.sh", "exec sleep 30\n");

    let mut config = ApplyConfig::default();
    config.timeouts.script_secs = 1;
    let runner = ApplyRunner::new(config, bundle.collaborators());

    let mut request = bundle.request();
    request.script_path = Some(script);

    let started = std::time::Instant::now();
    let err = runner.run(&request).await.unwrap_err();
    assert!(started.elapsed() < std::time::Duration::from_secs(15));

    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run");
    };
    let outcome = result.outcome(StepName::Script).unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
}

#[tokio::test]
async fn template_import_copies_templates_in_process() {
    let bundle = TestBundle::new();
    bundle.write("Templates/Source/en-US/baseline.adml", "<adml/>");
    bundle.write("Templates/Source/baseline.admx", "<admx/>");
    bundle.write("Templates/Source/readme.txt", "skip me");

    let mut request = bundle.request();
    request.template_root = Some(bundle.root.join("Templates/Source"));
    let result = bundle.runner().run(&request).await.unwrap();

    let outcome = result.outcome(StepName::TemplateImport).unwrap();
    assert_eq!(outcome.exit_code, 0);
    let templates = bundle.layout().templates_dir();
    assert!(templates.join("baseline.admx").is_file());
    assert!(templates.join("en-US/baseline.adml").is_file());
    assert!(!templates.join("readme.txt").exists());
}

#[tokio::test]
async fn template_import_without_templates_fails_the_step() {
    let bundle = TestBundle::new();
    bundle.write("Templates/Source/readme.txt", "nothing useful");

    let mut request = bundle.request();
    request.template_root = Some(bundle.root.join("Templates/Source"));
    let err = bundle.runner().run(&request).await.unwrap_err();

    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run");
    };
    assert_eq!(result.outcome(StepName::TemplateImport).unwrap().exit_code, 1);
}

#[tokio::test]
async fn mode_comes_from_override_then_manifest() {
    let bundle = TestBundle::new();
    bundle.write("Manifest/manifest.json", r#"{"hardeningMode": "Full"}"#);
    let script = bundle.write("Scripts/mode.sh", "echo \"$STIGAPPLY_HARDENING_MODE\"\n");

    let mut request = bundle.request();
    request.script_path = Some(script);
    let from_manifest = bundle.runner().run(&request).await.unwrap();
    assert_eq!(from_manifest.mode, HardeningMode::Full);

    request.mode_override = Some(HardeningMode::AuditOnly);
    let overridden = bundle.runner().run(&request).await.unwrap();
    assert_eq!(overridden.mode, HardeningMode::AuditOnly);
    let stdout =
        std::fs::read_to_string(overridden.steps[0].stdout_path.as_ref().unwrap()).unwrap();
    assert_eq!(stdout.trim(), "audit-only");
}

#[tokio::test]
async fn missing_bundle_root_is_a_precondition_failure() {
    let bundle = TestBundle::new();
    let mut request = bundle.request();
    request.bundle_root = bundle.root.join("does-not-exist");

    let err = bundle.runner().run(&request).await.unwrap_err();
    assert!(matches!(err, ApplyError::BundleRootMissing(_)));
}

#[tokio::test]
async fn held_lock_refuses_a_second_attempt() {
    let bundle = TestBundle::new();
    let marker = bundle.marker("should-not-run");
    let script = bundle.write(
        "Scripts/harden.sh",
        &format!("touch '{}'\n", marker.display()),
    );
    bundle.layout().ensure_dirs().unwrap();
    std::fs::write(bundle.layout().lock_path(), "pid=1\n").unwrap();

    let mut request = bundle.request();
    request.script_path = Some(script);
    let err = bundle.runner().run(&request).await.unwrap_err();

    assert!(matches!(err, ApplyError::BundleLocked { .. }));
    assert!(!marker.exists());
    assert!(bundle.layout().lock_path().exists(), "foreign lock is left alone");
}

#[tokio::test]
async fn invalid_run_id_is_rejected() {
    let bundle = TestBundle::new();
    let mut request = bundle.request();
    request.run_id = Some("../escape".into());

    let err = bundle.runner().run(&request).await.unwrap_err();
    assert!(matches!(err, ApplyError::InvalidRequest(_)));
}

#[tokio::test]
async fn skipped_snapshot_is_called_out_when_blocked() {
    let bundle = TestBundle::new();
    let script = bundle.write("Scripts/harden.sh", "exit 1\n");

    let mut request = bundle.request();
    request.script_path = Some(script);
    request.skip_snapshot = true;

    let err = bundle.runner().run(&request).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run");
    };
    assert!(result.rollback_script.is_none());
    assert!(result.snapshot_id.is_none());
    assert!(text.contains("no pre-apply snapshot was taken"));
}

#[tokio::test]
async fn cancelled_run_stops_before_the_next_step() {
    let bundle = TestBundle::new();
    let marker = bundle.marker("should-not-run");
    let script = bundle.write(
        "Scripts/harden.sh",
        &format!("touch '{}'\n", marker.display()),
    );

    let mut request = bundle.request();
    request.script_path = Some(script);
    request.run_id = Some("cancelled-run".into());

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let err = bundle
        .runner()
        .run_with_cancel(&request, &cancel)
        .await
        .unwrap_err();

    let ApplyError::Cancelled { remaining } = err else {
        panic!("expected cancellation");
    };
    assert_eq!(remaining, vec![StepName::Script]);
    assert!(!marker.exists());
    assert!(
        bundle
            .layout()
            .archived_summary_path("cancelled-run")
            .is_file()
    );
}
