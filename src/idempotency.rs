//! Skip-when-unchanged tracking keyed by operation.
//!
//! Completion alone is not enough to skip: callers compare the fingerprint of
//! the operation's inputs with the one recorded when it last completed.

use crate::util::{sha256_hex, write_json_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOperation {
    pub key: String,
    pub fingerprint: String,
    pub description: String,
    pub completed_at: DateTime<Utc>,
}

pub struct IdempotencyTracker {
    path: PathBuf,
    operations: BTreeMap<String, CompletedOperation>,
}

impl IdempotencyTracker {
    /// Load the mapping at `path`; a missing file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let operations = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing idempotency file {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, operations })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.operations.contains_key(key)
    }

    pub fn fingerprint_matches(&self, key: &str, fingerprint: &str) -> bool {
        self.operations
            .get(key)
            .is_some_and(|op| op.fingerprint == fingerprint)
    }

    pub fn get(&self, key: &str) -> Option<&CompletedOperation> {
        self.operations.get(key)
    }

    pub fn mark_completed(&mut self, key: &str, fingerprint: &str, description: &str) -> Result<()> {
        self.operations.insert(
            key.to_string(),
            CompletedOperation {
                key: key.to_string(),
                fingerprint: fingerprint.to_string(),
                description: description.to_string(),
                completed_at: Utc::now(),
            },
        );
        self.save()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.operations.clear();
        self.save()
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.operations)
            .with_context(|| format!("failed saving idempotency file {}", self.path.display()))
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed fingerprinting {}", path.display()))?;
    Ok(fingerprint_bytes(&bytes))
}
