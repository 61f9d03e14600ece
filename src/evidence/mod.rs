//! Per-step evidence and run-to-run continuity.
//!
//! Every executed step gets a content hash of its primary artifact. Against
//! the prior run named by the request, an equal hash marks the step
//! `retained` and a different one `superseded`. Evidence writing is best
//! effort: nothing here can fail a step.

pub mod collector;

pub use collector::{EvidenceCollector, EvidenceRecord, EvidenceRequest, FileEvidenceCollector};

use crate::apply::types::{ApplyStepOutcome, ContinuityMarker, StepName};
use crate::util::sha256_hex;
use std::collections::HashMap;
use std::path::Path;

pub fn continuity_marker(prior: Option<&str>, current: &str) -> Option<ContinuityMarker> {
    prior.map(|prior| {
        if prior == current {
            ContinuityMarker::Retained
        } else {
            ContinuityMarker::Superseded
        }
    })
}

/// Captured standard-out when there is any, otherwise a description of the
/// outcome that is stable across runs.
pub async fn primary_artifact(outcome: &ApplyStepOutcome) -> Vec<u8> {
    if let Some(path) = &outcome.stdout_path {
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.is_empty() => return bytes,
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(step = %outcome.step, path = %path.display(), "stdout unreadable: {error}");
            }
        }
    }
    format!(
        "step={};exit_code={};timed_out={}",
        outcome.step, outcome.exit_code, outcome.timed_out
    )
    .into_bytes()
}

pub struct StepEvidenceTracker<'a> {
    collector: &'a dyn EvidenceCollector,
    prior_hashes: &'a HashMap<StepName, String>,
    bundle_root: &'a Path,
    run_id: &'a str,
}

impl<'a> StepEvidenceTracker<'a> {
    pub fn new(
        collector: &'a dyn EvidenceCollector,
        prior_hashes: &'a HashMap<StepName, String>,
        bundle_root: &'a Path,
        run_id: &'a str,
    ) -> Self {
        Self {
            collector,
            prior_hashes,
            bundle_root,
            run_id,
        }
    }

    pub async fn record(&self, outcome: &mut ApplyStepOutcome) {
        let content = primary_artifact(outcome).await;
        let hash = sha256_hex(&content);

        outcome.continuity = continuity_marker(
            self.prior_hashes.get(&outcome.step).map(String::as_str),
            &hash,
        );
        outcome.artifact_hash = Some(hash.clone());

        let request = EvidenceRequest {
            bundle_root: self.bundle_root.to_path_buf(),
            run_id: self.run_id.to_string(),
            step: outcome.step,
            title: format!("{} output (exit code {})", outcome.step, outcome.exit_code),
            evidence_type: "apply-step".into(),
            source: "stigapply".into(),
            content,
        };

        match self.collector.write_evidence(&request).await {
            Ok(record) => {
                if record.hash != hash {
                    tracing::warn!(
                        step = %outcome.step,
                        collector = self.collector.name(),
                        "evidence collector reported a different content hash"
                    );
                }
                outcome.evidence_metadata_path = Some(record.metadata_path);
            }
            Err(error) => {
                tracing::warn!(
                    step = %outcome.step,
                    run_id = self.run_id,
                    "evidence write failed (non-fatal): {error:#}"
                );
            }
        }
    }
}
