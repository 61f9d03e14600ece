use std::path::PathBuf;
use std::sync::Arc;
use stigapply::apply::{ApplyRequest, ApplyRunner, BundleLayout, Collaborators};
use stigapply::collaborators::{
    ConfigurationManager, FileAuditTrail, FileSnapshotService, InMemoryConfigurationManager,
};
use stigapply::config::ApplyConfig;
use stigapply::evidence::FileEvidenceCollector;
use stigapply::observability::NoopObserver;
use stigapply::reboot::FlagFileRebootProbe;
use tempfile::TempDir;

/// A throwaway bundle plus a host reboot flag that step scripts may create.
pub struct TestBundle {
    _dir: TempDir,
    pub root: PathBuf,
    pub reboot_flag: PathBuf,
}

impl TestBundle {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp bundle");
        let root = std::fs::canonicalize(dir.path()).expect("canonical bundle root");
        std::fs::create_dir_all(root.join("host")).expect("host dir");
        let reboot_flag = root.join("host").join("reboot-required");
        Self {
            _dir: dir,
            root,
            reboot_flag,
        }
    }

    pub fn layout(&self) -> BundleLayout {
        BundleLayout::new(&self.root)
    }

    pub fn write(&self, relative: &str, body: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(&path, body).expect("write bundle file");
        path
    }

    /// Host-side file outside the bundle's apply directories.
    pub fn marker(&self, name: &str) -> PathBuf {
        self.root.join("host").join(name)
    }

    pub fn request(&self) -> ApplyRequest {
        ApplyRequest::new(&self.root)
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with(Arc::new(InMemoryConfigurationManager::new()))
    }

    pub fn collaborators_with(
        &self,
        config_manager: Arc<dyn ConfigurationManager>,
    ) -> Collaborators {
        Collaborators {
            snapshots: Arc::new(FileSnapshotService::new()),
            config_manager,
            evidence: Arc::new(FileEvidenceCollector::new()),
            audit: Some(Arc::new(FileAuditTrail::new(self.layout().audit_path()))),
            reboot_probe: Arc::new(FlagFileRebootProbe::new(vec![self.reboot_flag.clone()])),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn runner(&self) -> ApplyRunner {
        ApplyRunner::new(ApplyConfig::default(), self.collaborators())
    }
}
