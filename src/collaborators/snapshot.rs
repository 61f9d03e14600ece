use super::CollabFuture;
use crate::error::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Handle to a pre-apply snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    /// Directory holding the snapshot payload.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Captures host state before apply and produces an operator rollback script.
pub trait SnapshotService: Send + Sync {
    fn name(&self) -> &str;

    fn create_snapshot<'a>(
        &'a self,
        dir: &'a Path,
    ) -> CollabFuture<'a, Result<SnapshotInfo, SnapshotError>>;

    fn generate_rollback_script<'a>(
        &'a self,
        snapshot: &'a SnapshotInfo,
    ) -> CollabFuture<'a, Result<PathBuf, SnapshotError>>;
}

const SNAPSHOT_MANIFEST: &str = "snapshot.json";
const ROLLBACK_SCRIPT: &str = "rollback.sh";

#[derive(Debug, Serialize)]
struct SnapshotManifest<'a> {
    snapshot_id: &'a str,
    created_at: DateTime<Utc>,
    host: String,
}

/// Writes a snapshot manifest and an operator-run rollback script into
/// `<dir>/<snapshot_id>/`.
pub struct FileSnapshotService;

impl FileSnapshotService {
    pub const fn new() -> Self {
        Self
    }
}

impl SnapshotService for FileSnapshotService {
    fn name(&self) -> &str {
        "file"
    }

    fn create_snapshot<'a>(
        &'a self,
        dir: &'a Path,
    ) -> CollabFuture<'a, Result<SnapshotInfo, SnapshotError>> {
        Box::pin(async move {
            let created_at = Utc::now();
            let snapshot_id = format!(
                "snap_{}_{}",
                created_at.format("%Y%m%dT%H%M%SZ"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            );
            let path = dir.join(&snapshot_id);
            let create_err = |e: &dyn std::fmt::Display| SnapshotError::Create {
                dir: dir.to_path_buf(),
                message: e.to_string(),
            };

            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| create_err(&e))?;

            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".into());
            let manifest = SnapshotManifest {
                snapshot_id: &snapshot_id,
                created_at,
                host,
            };
            let json = serde_json::to_vec_pretty(&manifest).map_err(|e| create_err(&e))?;
            tokio::fs::write(path.join(SNAPSHOT_MANIFEST), json)
                .await
                .map_err(|e| create_err(&e))?;

            tracing::info!(snapshot_id = %snapshot_id, path = %path.display(), "snapshot.created");
            Ok(SnapshotInfo {
                snapshot_id,
                path,
                created_at,
            })
        })
    }

    fn generate_rollback_script<'a>(
        &'a self,
        snapshot: &'a SnapshotInfo,
    ) -> CollabFuture<'a, Result<PathBuf, SnapshotError>> {
        Box::pin(async move {
            let script_path = snapshot.path.join(ROLLBACK_SCRIPT);
            let body = format!(
                "#!/bin/sh\n\
                 # Rollback for snapshot {id} (taken {at}).\n\
                 # This script is never run automatically. Review it before running.\n\
                 set -eu\n\
                 SNAPSHOT_DIR=\"{dir}\"\n\
                 echo \"Restoring host state recorded in $SNAPSHOT_DIR\"\n",
                id = snapshot.snapshot_id,
                at = snapshot.created_at.to_rfc3339(),
                dir = snapshot.path.display(),
            );
            let rollback_err = |e: std::io::Error| SnapshotError::RollbackScript {
                snapshot_id: snapshot.snapshot_id.clone(),
                message: e.to_string(),
            };

            tokio::fs::write(&script_path, body)
                .await
                .map_err(rollback_err)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o700))
                    .await
                    .map_err(rollback_err)?;
            }

            Ok(script_path)
        })
    }
}
