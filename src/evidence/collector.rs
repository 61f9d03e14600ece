use crate::apply::layout::BundleLayout;
use crate::apply::types::StepName;
use crate::collaborators::CollabFuture;
use crate::util::{sha256_hex, write_atomic, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Evidence for one step, correlated to its run.
#[derive(Debug, Clone)]
pub struct EvidenceRequest {
    pub bundle_root: PathBuf,
    pub run_id: String,
    pub step: StepName,
    pub title: String,
    pub evidence_type: String,
    pub source: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub metadata_path: PathBuf,
    pub hash: String,
}

pub trait EvidenceCollector: Send + Sync {
    fn name(&self) -> &str;

    fn write_evidence<'a>(
        &'a self,
        request: &'a EvidenceRequest,
    ) -> CollabFuture<'a, Result<EvidenceRecord>>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    pub title: String,
    pub evidence_type: String,
    pub source: String,
    pub run_id: String,
    pub step: StepName,
    pub sha256: String,
    pub content_length: usize,
    pub artifact: PathBuf,
    pub collected_at: DateTime<Utc>,
}

/// Writes `<step>.artifact` and `<step>.json` under
/// `Apply/Evidence/<run_id>/` of the bundle.
pub struct FileEvidenceCollector;

impl FileEvidenceCollector {
    pub const fn new() -> Self {
        Self
    }
}

impl EvidenceCollector for FileEvidenceCollector {
    fn name(&self) -> &str {
        "file"
    }

    fn write_evidence<'a>(
        &'a self,
        request: &'a EvidenceRequest,
    ) -> CollabFuture<'a, Result<EvidenceRecord>> {
        Box::pin(async move {
            let dir = BundleLayout::new(&request.bundle_root)
                .evidence_dir()
                .join(&request.run_id);
            let artifact = dir.join(format!("{}.artifact", request.step));
            let metadata_path = dir.join(format!("{}.json", request.step));
            let hash = sha256_hex(&request.content);

            write_atomic(&artifact, &request.content)?;
            let metadata = EvidenceMetadata {
                title: request.title.clone(),
                evidence_type: request.evidence_type.clone(),
                source: request.source.clone(),
                run_id: request.run_id.clone(),
                step: request.step,
                sha256: hash.clone(),
                content_length: request.content.len(),
                artifact,
                collected_at: Utc::now(),
            };
            write_json_atomic(&metadata_path, &metadata)?;

            Ok(EvidenceRecord {
                metadata_path,
                hash,
            })
        })
    }
}
