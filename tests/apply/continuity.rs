use crate::apply_harness::TestBundle;
use stigapply::apply::{ApplyRequest, ContinuityMarker, StepName};

fn request(bundle: &TestBundle, run_id: &str, prior: Option<&str>) -> ApplyRequest {
    let mut request = bundle.request();
    request.script_path = Some(bundle.root.join("Scripts/harden.sh"));
    request.run_id = Some(run_id.into());
    request.prior_run_id = prior.map(str::to_string);
    request
}

fn script_continuity(result: &stigapply::ApplyResult) -> Option<ContinuityMarker> {
    result.outcome(StepName::Script).and_then(|o| o.continuity)
}

#[tokio::test]
async fn unchanged_output_is_retained_and_changed_output_superseded() {
    let bundle = TestBundle::new();
    bundle.write("Scripts/harden.sh", "echo 'baseline v1 applied'\n");

    let first = bundle
        .runner()
        .run(&request(&bundle, "r1", None))
        .await
        .unwrap();
    assert_eq!(script_continuity(&first), None);
    let first_hash = first.steps[0].artifact_hash.clone().unwrap();

    let second = bundle
        .runner()
        .run(&request(&bundle, "r2", Some("r1")))
        .await
        .unwrap();
    assert_eq!(script_continuity(&second), Some(ContinuityMarker::Retained));
    assert_eq!(second.steps[0].artifact_hash.as_ref(), Some(&first_hash));

    bundle.write("Scripts/harden.sh", "echo 'baseline v2 applied'\n");
    let third = bundle
        .runner()
        .run(&request(&bundle, "r3", Some("r2")))
        .await
        .unwrap();
    assert_eq!(script_continuity(&third), Some(ContinuityMarker::Superseded));

    // r1 is still archived even though r3 is now the latest summary.
    let against_first = bundle
        .runner()
        .run(&request(&bundle, "r4", Some("r1")))
        .await
        .unwrap();
    assert_eq!(
        script_continuity(&against_first),
        Some(ContinuityMarker::Superseded)
    );
}

#[tokio::test]
async fn unknown_prior_run_yields_no_marker() {
    let bundle = TestBundle::new();
    bundle.write("Scripts/harden.sh", "echo ok\n");

    bundle
        .runner()
        .run(&request(&bundle, "r1", None))
        .await
        .unwrap();
    let result = bundle
        .runner()
        .run(&request(&bundle, "r2", Some("never-ran")))
        .await
        .unwrap();

    assert_eq!(script_continuity(&result), None);
    assert!(result.steps[0].artifact_hash.is_some());
    assert!(result.is_mission_complete);
}

#[tokio::test]
async fn every_executed_step_gets_evidence_metadata() {
    let bundle = TestBundle::new();
    bundle.write("Scripts/harden.sh", "echo evidence\n");

    let result = bundle
        .runner()
        .run(&request(&bundle, "r1", None))
        .await
        .unwrap();
    let metadata = result.steps[0].evidence_metadata_path.as_ref().unwrap();
    assert!(metadata.is_file());
    assert!(metadata.starts_with(&bundle.root));
}

#[tokio::test]
async fn steps_run_before_a_reboot_keep_their_continuity() {
    let bundle = TestBundle::new();
    bundle.write("Scripts/harden.sh", "echo 'baseline applied'\n");
    let first_boot = bundle.marker("first-boot-done");
    bundle.write(
        "Policy/apply.sh",
        &format!(
            "echo 'configuration applied'\n\
             if [ ! -e '{marker}' ]; then touch '{marker}' '{flag}'; fi\n",
            marker = first_boot.display(),
            flag = bundle.reboot_flag.display(),
        ),
    );
    let with_dsc = |run_id: &str, prior: Option<&str>| {
        let mut with_dsc = request(&bundle, run_id, prior);
        with_dsc.dsc_manifest_path = Some(bundle.root.join("Policy/apply.sh"));
        with_dsc
    };

    let paused = bundle.runner().run(&with_dsc("run-a", None)).await.unwrap();
    assert!(paused.reboot_pending);
    assert_eq!(paused.steps.len(), 2);
    std::fs::remove_file(&bundle.reboot_flag).unwrap();

    let resumed = bundle.runner().run(&with_dsc("run-b", None)).await.unwrap();
    assert!(resumed.steps.is_empty());
    assert_eq!(
        resumed.resumed_steps,
        vec![StepName::Script, StepName::DeclarativeApply]
    );
    assert_eq!(resumed.resumed_outcomes.len(), 2);
    assert_eq!(
        resumed
            .full_outcome(StepName::Script)
            .and_then(|o| o.artifact_hash.clone()),
        paused.steps[0].artifact_hash
    );

    let later = bundle
        .runner()
        .run(&with_dsc("run-c", Some("run-b")))
        .await
        .unwrap();
    assert!(!later.reboot_pending);
    for step in [StepName::Script, StepName::DeclarativeApply] {
        assert_eq!(
            later.outcome(step).and_then(|o| o.continuity),
            Some(ContinuityMarker::Retained),
            "{step}"
        );
    }
}
