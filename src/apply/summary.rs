use super::layout::BundleLayout;
use super::types::{ApplyResult, ApplyStepOutcome, StepName};
use crate::util::{is_valid_run_id, write_json_atomic};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Write the run summary as the bundle's latest summary and archive it under
/// its run id. Returns the latest-summary path.
pub fn persist_summary(layout: &BundleLayout, result: &ApplyResult) -> Result<PathBuf> {
    let latest = layout.summary_path();
    write_json_atomic(&latest, result)
        .with_context(|| format!("failed writing run summary {}", latest.display()))?;

    let archived = layout.archived_summary_path(&result.run_id);
    write_json_atomic(&archived, result)
        .with_context(|| format!("failed archiving run summary {}", archived.display()))?;

    tracing::debug!(run_id = %result.run_id, path = %latest.display(), "run summary persisted");
    Ok(latest)
}

fn read_summary(path: &Path) -> Option<ApplyResult> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(summary) => Some(summary),
        Err(error) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable run summary: {error}");
            None
        }
    }
}

pub fn read_latest_summary(layout: &BundleLayout) -> Option<ApplyResult> {
    read_summary(&layout.summary_path())
}

/// Summary recorded for `run_id`, from its archive or, failing that, the
/// latest summary. Only a summary whose own run id matches is returned.
fn find_summary(layout: &BundleLayout, run_id: &str) -> Option<ApplyResult> {
    if !is_valid_run_id(run_id) {
        return None;
    }
    [layout.archived_summary_path(run_id), layout.summary_path()]
        .iter()
        .filter_map(|path| read_summary(path))
        .find(|summary| summary.run_id == run_id)
}

/// Per-step artifact hashes of `prior_run_id`, including steps that run
/// completed before a reboot it resumed from.
///
/// A summary is only trusted when its own recorded run id equals the one
/// asked for; anything else yields an empty baseline.
pub fn load_prior_step_hashes(
    layout: &BundleLayout,
    prior_run_id: Option<&str>,
) -> HashMap<StepName, String> {
    let Some(prior_run_id) = prior_run_id else {
        return HashMap::new();
    };
    let Some(summary) = find_summary(layout, prior_run_id) else {
        tracing::info!(prior_run_id, "no summary recorded for prior run; continuity skipped");
        return HashMap::new();
    };

    summary
        .resumed_outcomes
        .into_iter()
        .chain(summary.steps)
        .filter_map(|outcome| outcome.artifact_hash.map(|hash| (outcome.step, hash)))
        .collect()
}

/// Outcomes of `completed` as recorded by the attempt that scheduled the
/// reboot, carrying forward whatever that attempt had itself resumed.
pub fn load_resumed_outcomes(
    layout: &BundleLayout,
    scheduled_by: Option<&str>,
    completed: &[StepName],
) -> Vec<ApplyStepOutcome> {
    let Some(summary) = scheduled_by.and_then(|run_id| find_summary(layout, run_id)) else {
        if !completed.is_empty() {
            tracing::warn!(
                scheduled_by = scheduled_by.unwrap_or("unknown"),
                "no summary for the attempt before the reboot; its step outcomes are not carried"
            );
        }
        return Vec::new();
    };

    let mut outcomes: Vec<ApplyStepOutcome> = Vec::new();
    for outcome in summary.resumed_outcomes.into_iter().chain(summary.steps) {
        if !completed.contains(&outcome.step) {
            continue;
        }
        outcomes.retain(|kept| kept.step != outcome.step);
        outcomes.push(outcome);
    }
    outcomes
}
