use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Outcome of an in-process template import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateImport {
    /// Destination paths, relative to the destination root.
    pub copied: Vec<PathBuf>,
}

impl TemplateImport {
    pub fn exit_code(&self) -> i32 {
        if self.copied.is_empty() { 1 } else { 0 }
    }

    /// Listing recorded as the step's standard-out.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for path in &self.copied {
            out.push_str(&path.display().to_string());
            out.push('\n');
        }
        out
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Copy every file under `source` whose extension is listed into `dest`,
/// keeping relative paths. Enumeration stops with an error when `cancel`
/// fires.
pub async fn import_templates(
    source: &Path,
    dest: &Path,
    extensions: &[String],
    cancel: &CancellationToken,
) -> Result<TemplateImport> {
    if !source.is_dir() {
        bail!("template root is not a directory: {}", source.display());
    }

    let mut pending = vec![source.to_path_buf()];
    let mut found = Vec::new();
    while let Some(dir) = pending.pop() {
        if cancel.is_cancelled() {
            bail!("template import cancelled during enumeration");
        }
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed reading {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_extension(&path, extensions) {
                found.push(path);
            }
        }
    }
    found.sort();

    let mut import = TemplateImport::default();
    for path in found {
        let relative = path.strip_prefix(source).unwrap_or(&path).to_path_buf();
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        tokio::fs::copy(&path, &target)
            .await
            .with_context(|| format!("failed copying {}", path.display()))?;
        import.copied.push(relative);
    }

    tracing::debug!(
        source = %source.display(),
        copied = import.copied.len(),
        "templates imported"
    );
    Ok(import)
}
