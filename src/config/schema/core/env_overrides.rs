use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(flag) = std::env::var("STIGAPPLY_REBOOT_FLAG")
            && !flag.is_empty()
        {
            self.reboot.flag_paths = vec![flag];
        }

        if let Ok(script) = std::env::var("STIGAPPLY_PREFLIGHT_SCRIPT")
            && !script.is_empty()
        {
            self.preflight.script = Some(script);
        }

        if let Ok(backend) = std::env::var("STIGAPPLY_OBSERVABILITY")
            && !backend.is_empty()
        {
            self.observability.backend = backend;
        }

        if let Ok(secs) = std::env::var("STIGAPPLY_SCRIPT_TIMEOUT_SECS")
            && let Ok(secs) = secs.parse::<u64>()
            && secs > 0
        {
            self.apply.timeouts.script_secs = secs;
        }
    }
}
