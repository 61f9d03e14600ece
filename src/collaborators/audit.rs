use super::CollabFuture;
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: String,
    pub action: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl AuditEntry {
    pub fn new(run_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            action: action.into(),
            detail: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Tamper-evident record of apply activity.
pub trait AuditTrail: Send + Sync {
    fn name(&self) -> &str;

    /// Append `entry` and return the hash that now heads the trail.
    fn record_entry<'a>(&'a self, entry: &'a AuditEntry) -> CollabFuture<'a, Result<String>>;

    /// `Ok(false)` means the trail has been altered. When `anchor` is given,
    /// the link with that hash must still be part of the chain, so deleted or
    /// truncated history fails verification too.
    fn verify_integrity<'a>(&'a self, anchor: Option<&'a str>) -> CollabFuture<'a, Result<bool>>;
}

/// Hashed body of one chain link; `hash` is computed over this.
#[derive(Debug, Serialize)]
struct LinkBody<'a> {
    seq: u64,
    recorded_at: &'a str,
    run_id: &'a str,
    action: &'a str,
    detail: &'a serde_json::Value,
    prev_hash: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditLink {
    seq: u64,
    recorded_at: String,
    run_id: String,
    action: String,
    #[serde(default)]
    detail: serde_json::Value,
    prev_hash: Option<String>,
    hash: String,
}

impl AuditLink {
    fn compute_hash(&self) -> Result<String> {
        let body = LinkBody {
            seq: self.seq,
            recorded_at: &self.recorded_at,
            run_id: &self.run_id,
            action: &self.action,
            detail: &self.detail,
            prev_hash: self.prev_hash.as_deref(),
        };
        Ok(sha256_hex(&serde_json::to_vec(&body)?))
    }
}

/// JSON-lines audit trail where every line links to the hash of the line
/// before it.
pub struct FileAuditTrail {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileAuditTrail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_links(&self) -> Result<Vec<AuditLink>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading audit trail: {}", self.path.display()))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(index, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("malformed audit trail line {}", index + 1)
                })
            })
            .collect()
    }

    fn append(&self, entry: &AuditEntry) -> Result<String> {
        let links = self.read_links()?;
        let last = links.last();
        let mut link = AuditLink {
            seq: last.map_or(0, |l| l.seq + 1),
            recorded_at: Utc::now().to_rfc3339(),
            run_id: entry.run_id.clone(),
            action: entry.action.clone(),
            detail: entry.detail.clone(),
            prev_hash: last.map(|l| l.hash.clone()),
            hash: String::new(),
        };
        link.hash = link.compute_hash()?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening audit trail: {}", self.path.display()))?;
        let mut line = serde_json::to_string(&link)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(link.hash)
    }

    fn verify(&self, anchor: Option<&str>) -> Result<bool> {
        let links = match self.read_links() {
            Ok(links) => links,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), "audit trail unreadable: {error:#}");
                return Ok(false);
            }
        };

        let mut expected_prev: Option<&str> = None;
        for (index, link) in links.iter().enumerate() {
            let seq_ok = u64::try_from(index).is_ok_and(|i| i == link.seq);
            if !seq_ok || link.prev_hash.as_deref() != expected_prev {
                tracing::warn!(seq = link.seq, "audit trail link mismatch");
                return Ok(false);
            }
            if link.compute_hash()? != link.hash {
                tracing::warn!(seq = link.seq, "audit trail hash mismatch");
                return Ok(false);
            }
            expected_prev = Some(link.hash.as_str());
        }

        if let Some(anchor) = anchor
            && !links.iter().any(|link| link.hash == anchor)
        {
            tracing::warn!(
                path = %self.path.display(),
                anchor,
                links = links.len(),
                "audit trail no longer contains its last anchored link"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl AuditTrail for FileAuditTrail {
    fn name(&self) -> &str {
        "file"
    }

    fn record_entry<'a>(&'a self, entry: &'a AuditEntry) -> CollabFuture<'a, Result<String>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.append(entry)
        })
    }

    fn verify_integrity<'a>(&'a self, anchor: Option<&'a str>) -> CollabFuture<'a, Result<bool>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            self.verify(anchor)
        })
    }
}
