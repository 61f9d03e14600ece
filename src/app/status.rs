use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use stigapply::Config;
use stigapply::apply::lock::LockHolder;
use stigapply::apply::{ApplyResult, BundleLayout, read_latest_summary};
use stigapply::idempotency::IdempotencyTracker;
use stigapply::reboot::{CoordinatorState, FlagFileRebootProbe, RebootCoordinator};

pub fn render_result(result: &ApplyResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run {} ({})", result.run_id, result.mode);
    if let Some(prior) = &result.prior_run_id {
        let _ = writeln!(out, "  prior run:   {prior}");
    }
    for step in &result.resumed_steps {
        let _ = writeln!(out, "  {step:<20} done before reboot");
    }
    for outcome in &result.steps {
        let continuity = outcome
            .continuity
            .map(|marker| format!(" [{marker}]"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<20} exit {}{}{}",
            outcome.step,
            outcome.exit_code,
            if outcome.timed_out { " (timed out)" } else { "" },
            continuity
        );
    }
    for step in &result.skipped_steps {
        let _ = writeln!(out, "  {step:<20} skipped");
    }
    if let Some(rollback) = &result.rollback_script {
        let _ = writeln!(out, "  rollback:    {}", rollback.display());
    }
    let _ = writeln!(out, "  convergence: {:?}", result.convergence);
    let _ = writeln!(out, "  reboots:     {}", result.reboot_count);
    let _ = write!(
        out,
        "  status:      {}",
        if result.reboot_pending {
            "paused for reboot"
        } else if result.is_mission_complete {
            "mission complete"
        } else {
            "incomplete"
        }
    );
    out
}

pub fn render_status(config: &Config, bundle: &Path) -> String {
    let layout = BundleLayout::new(bundle);
    let coordinator = RebootCoordinator::new(
        layout.checkpoint_path(),
        Arc::new(FlagFileRebootProbe::new(config.reboot.resolved_flag_paths())),
    );

    let mut lines = vec![
        "◆ stigapply status".to_string(),
        String::new(),
        format!("Version     {}", env!("CARGO_PKG_VERSION")),
        format!("Config      {}", config.config_path.display()),
        format!("Bundle      {}", bundle.display()),
        String::new(),
        format!(
            "  Checkpoint  {}",
            match coordinator.state() {
                CoordinatorState::Idle => "none",
                CoordinatorState::PendingResume => "pending resume",
            }
        ),
        format!("  Lock        {}", lock_state(&layout.lock_path())),
        format!(
            "  Host reboot {}",
            if coordinator.detect_reboot_required() {
                "required"
            } else {
                "not required"
            }
        ),
        format!(
            "  Idempotency {}",
            match IdempotencyTracker::load(layout.idempotency_path()) {
                Ok(tracker) => format!("{} tracked operation(s)", tracker.len()),
                Err(error) => format!("unreadable ({error})"),
            }
        ),
        format!("  Observability  {}", config.observability.backend),
        String::new(),
    ];

    match read_latest_summary(&layout) {
        Some(summary) => lines.push(render_result(&summary)),
        None => lines.push("No apply run recorded for this bundle.".to_string()),
    }

    lines.join("\n")
}

fn lock_state(path: &Path) -> String {
    if !path.exists() {
        return "free".into();
    }
    match LockHolder::read(path).and_then(|holder| holder.stale_reason()) {
        Some(reason) => format!("stale ({reason})"),
        None => "held".into(),
    }
}
