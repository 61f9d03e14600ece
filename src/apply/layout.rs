use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const APPLY_DIR: &str = "Apply";
pub const SUMMARY_FILE: &str = "apply_run.json";
pub const CHECKPOINT_FILE: &str = "reboot_context.json";
pub const LOCK_FILE: &str = ".apply.lock";
pub const IDEMPOTENCY_FILE: &str = "idempotency.json";
pub const AUDIT_FILE: &str = "audit.jsonl";

/// Bundle-relative locations owned by the apply engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apply_dir(&self) -> PathBuf {
        self.root.join(APPLY_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.apply_dir().join("Logs")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.logs_dir().join("runs")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.apply_dir().join("Snapshots")
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.apply_dir().join("Evidence")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.apply_dir().join("Templates")
    }

    pub fn compiled_dir(&self) -> PathBuf {
        self.apply_dir().join("Compiled")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.apply_dir().join(SUMMARY_FILE)
    }

    pub fn archived_summary_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.apply_dir().join(CHECKPOINT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.apply_dir().join(LOCK_FILE)
    }

    pub fn idempotency_path(&self) -> PathBuf {
        self.apply_dir().join(IDEMPOTENCY_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.apply_dir().join(AUDIT_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("Manifest").join("manifest.json")
    }

    pub fn step_log_path(&self, step: &str, stream: &str) -> PathBuf {
        self.logs_dir().join(format!("{step}.{stream}.log"))
    }

    /// Create-if-absent for every directory a run writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.apply_dir(),
            self.logs_dir(),
            self.runs_dir(),
            self.snapshots_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        Ok(())
    }
}
