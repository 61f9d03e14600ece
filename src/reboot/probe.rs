use std::path::PathBuf;

/// Read-only probe of whether the host has a reboot pending.
pub trait RebootProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Must be side-effect free; callers may probe any number of times.
    fn reboot_required(&self) -> bool;
}

/// Reports a pending reboot when any of the configured flag files exists,
/// e.g. `/var/run/reboot-required` on Debian-family hosts.
pub struct FlagFileRebootProbe {
    flag_paths: Vec<PathBuf>,
}

impl FlagFileRebootProbe {
    pub fn new(flag_paths: Vec<PathBuf>) -> Self {
        Self { flag_paths }
    }
}

impl RebootProbe for FlagFileRebootProbe {
    fn name(&self) -> &str {
        "flag-file"
    }

    fn reboot_required(&self) -> bool {
        self.flag_paths.iter().any(|path| path.exists())
    }
}
