use crate::error::ApplyError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Identifier of the current boot, where the host exposes one.
fn current_boot_id() -> Option<String> {
    let raw = std::fs::read_to_string(BOOT_ID_PATH).ok()?;
    let id = raw.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Holder fields recorded in a lock file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: Option<u32>,
    pub run_id: Option<String>,
    pub boot_id: Option<String>,
}

impl LockHolder {
    pub fn parse(raw: &str) -> Self {
        let mut holder = Self::default();
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "pid" => holder.pid = value.parse().ok(),
                "run_id" => holder.run_id = Some(value.to_string()),
                "boot_id" => holder.boot_id = Some(value.to_string()),
                _ => {}
            }
        }
        holder
    }

    pub fn read(path: &Path) -> Option<Self> {
        std::fs::read_to_string(path).ok().map(|raw| Self::parse(&raw))
    }

    /// Why the recorded holder can no longer be running, if that is known.
    pub fn stale_reason(&self) -> Option<String> {
        if let (Some(recorded), Some(current)) = (&self.boot_id, current_boot_id())
            && *recorded != current
        {
            return Some("recorded before the last host reboot".into());
        }
        let pid = self.pid?;
        if cfg!(target_os = "linux")
            && Path::new("/proc").is_dir()
            && !Path::new("/proc").join(pid.to_string()).exists()
        {
            return Some(format!("holder process {pid} is no longer running"));
        }
        None
    }
}

/// Advisory single-writer lock over a bundle's apply directories.
///
/// Created with create-exclusive semantics and removed when dropped, so every
/// exit path out of a run releases it. A leftover lock is never removed
/// automatically; the refusal says when its holder is known to be gone.
#[derive(Debug)]
pub struct BundleLock {
    path: PathBuf,
}

impl BundleLock {
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self, ApplyError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                let stale = LockHolder::read(path).and_then(|holder| holder.stale_reason());
                if let Some(reason) = &stale {
                    tracing::warn!(path = %path.display(), "bundle lock looks stale: {reason}");
                }
                return Err(ApplyError::BundleLocked {
                    lock_path: path.to_path_buf(),
                    stale,
                });
            }
            Err(error) => return Err(error.into()),
        };

        let mut holder = format!(
            "pid={}\nrun_id={run_id}\nacquired_at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        if let Some(boot_id) = current_boot_id() {
            holder.push_str(&format!("boot_id={boot_id}\n"));
        }
        if let Err(error) = file.write_all(holder.as_bytes()) {
            tracing::warn!(path = %path.display(), "failed to record lock holder: {error}");
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to release bundle lock: {error}");
        }
    }
}
