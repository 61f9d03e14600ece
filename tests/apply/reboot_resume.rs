use crate::apply_harness::TestBundle;
use chrono::Utc;
use stigapply::apply::{ApplyRequest, StepName};
use stigapply::convergence::ConvergenceStatus;
use stigapply::error::ApplyError;
use stigapply::reboot::{REBOOT_CONTEXT_VERSION, RebootContext};

/// Script step that leaves a reboot pending, followed by a declarative step.
fn two_step_request(bundle: &TestBundle, script_exit: i32) -> ApplyRequest {
    let script = bundle.write(
        "Scripts/harden.sh",
        &format!(
            "touch '{}'\nexit {script_exit}\n",
            bundle.reboot_flag.display()
        ),
    );
    let dsc = bundle.write(
        "Policy/apply.sh",
        &format!("touch '{}'\n", bundle.marker("dsc-ran").display()),
    );
    let mut request = bundle.request();
    request.script_path = Some(script);
    request.dsc_manifest_path = Some(dsc);
    request
}

fn write_checkpoint(bundle: &TestBundle, context: &RebootContext) {
    bundle.layout().ensure_dirs().unwrap();
    std::fs::write(
        bundle.layout().checkpoint_path(),
        serde_json::to_string_pretty(context).unwrap(),
    )
    .unwrap();
}

fn checkpoint(bundle: &TestBundle, completed: Vec<StepName>, reboot_count: u32) -> RebootContext {
    RebootContext {
        version: REBOOT_CONTEXT_VERSION,
        bundle_root: bundle.root.clone(),
        current_step_index: 1,
        completed_steps: completed,
        failed_steps: Vec::new(),
        planned_steps: vec![StepName::Script, StepName::DeclarativeApply],
        scheduled_at: Utc::now(),
        reboot_count,
        run_id: Some("before-reboot".into()),
    }
}

#[tokio::test]
async fn pending_reboot_pauses_then_resumes_remaining_steps() {
    let bundle = TestBundle::new();
    let request = two_step_request(&bundle, 0);

    let paused = bundle.runner().run(&request).await.unwrap();
    assert!(paused.reboot_pending);
    assert_eq!(paused.reboot_count, 1);
    assert_eq!(paused.convergence, ConvergenceStatus::Diverged);
    assert!(!paused.is_mission_complete);
    let steps: Vec<StepName> = paused.steps.iter().map(|o| o.step).collect();
    assert_eq!(steps, vec![StepName::Script]);
    assert!(!bundle.marker("dsc-ran").exists());

    let stored: RebootContext = serde_json::from_str(
        &std::fs::read_to_string(bundle.layout().checkpoint_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(stored.current_step_index, 1);
    assert_eq!(stored.completed_steps, vec![StepName::Script]);
    assert_eq!(stored.reboot_count, 1);

    // The host came back up.
    std::fs::remove_file(&bundle.reboot_flag).unwrap();

    let resumed = bundle.runner().run(&request).await.unwrap();
    let steps: Vec<StepName> = resumed.steps.iter().map(|o| o.step).collect();
    assert_eq!(steps, vec![StepName::DeclarativeApply]);
    assert_eq!(resumed.resumed_steps, vec![StepName::Script]);
    assert_eq!(resumed.reboot_count, 1);
    assert!(!resumed.reboot_pending);
    assert!(resumed.is_mission_complete);
    assert_eq!(resumed.convergence, ConvergenceStatus::Converged);
    assert!(bundle.marker("dsc-ran").exists());
    assert!(!bundle.layout().checkpoint_path().exists());
}

#[tokio::test]
async fn checkpoint_for_another_bundle_is_refused() {
    let bundle = TestBundle::new();
    let request = two_step_request(&bundle, 0);
    let mut foreign = checkpoint(&bundle, vec![StepName::Script], 1);
    foreign.bundle_root = "/bundles/someone-else".into();
    write_checkpoint(&bundle, &foreign);

    let err = bundle.runner().run(&request).await.unwrap_err();
    assert!(matches!(err, ApplyError::ResumeInvalid { .. }));
    assert!(!bundle.reboot_flag.exists(), "no step may run");
    assert!(!bundle.marker("dsc-ran").exists());
    assert!(bundle.layout().checkpoint_path().exists());
}

#[tokio::test]
async fn checkpoint_naming_unplanned_step_is_refused() {
    let bundle = TestBundle::new();
    let request = two_step_request(&bundle, 0);
    write_checkpoint(
        &bundle,
        &checkpoint(&bundle, vec![StepName::LocalPolicyApply], 1),
    );

    let err = bundle.runner().run(&request).await.unwrap_err();
    let ApplyError::ResumeInvalid { reason, .. } = err else {
        panic!("expected an invalid resume");
    };
    assert!(reason.contains("local-policy-apply"));
    assert!(!bundle.reboot_flag.exists());
}

#[tokio::test]
async fn malformed_checkpoint_is_left_for_the_operator() {
    let bundle = TestBundle::new();
    let request = two_step_request(&bundle, 0);
    bundle.layout().ensure_dirs().unwrap();
    std::fs::write(bundle.layout().checkpoint_path(), "{ not json").unwrap();

    let err = bundle.runner().run(&request).await.unwrap_err();
    assert!(matches!(err, ApplyError::ResumeInvalid { .. }));
    assert_eq!(
        std::fs::read_to_string(bundle.layout().checkpoint_path()).unwrap(),
        "{ not json"
    );
}

#[tokio::test]
async fn failure_before_reboot_still_blocks_after_resume() {
    let bundle = TestBundle::new();
    let request = two_step_request(&bundle, 4);

    let paused = bundle.runner().run(&request).await.unwrap();
    assert!(paused.reboot_pending);
    std::fs::remove_file(&bundle.reboot_flag).unwrap();

    let err = bundle.runner().run(&request).await.unwrap_err();
    let text = err.to_string();
    let ApplyError::Blocked { result, .. } = err else {
        panic!("expected a blocked run, got {text}");
    };
    assert!(text.contains("step 'script' exited with code 4 (before reboot)"));
    assert!(result.outcome(StepName::DeclarativeApply).unwrap().succeeded());
    assert_eq!(result.convergence, ConvergenceStatus::Diverged);
    assert!(!result.is_mission_complete);
}

#[tokio::test]
async fn reboot_budget_exhaustion_is_reported_not_refused() {
    let bundle = TestBundle::new();
    let script = bundle.write("Scripts/harden.sh", "exit 0\n");
    let dsc = bundle.write(
        "Policy/apply.sh",
        &format!("touch '{}'\n", bundle.reboot_flag.display()),
    );
    let mut request = bundle.request();
    request.script_path = Some(script);
    request.dsc_manifest_path = Some(dsc);
    write_checkpoint(&bundle, &checkpoint(&bundle, vec![StepName::Script], 3));

    let result = bundle.runner().run(&request).await.unwrap();
    assert!(result.reboot_pending);
    assert_eq!(result.reboot_count, 4);
    assert_eq!(result.convergence, ConvergenceStatus::Exceeded);
    assert!(bundle.layout().checkpoint_path().exists());
}
