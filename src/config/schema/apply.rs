use crate::apply::types::StepName;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Program plus argument templates used to run one step's tool.
///
/// Arguments may contain `{path}`, `{module}`, `{data}` and `{output}`. An
/// argument made only of placeholders that resolve to nothing is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLauncher {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl StepLauncher {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn render(&self, vars: &[(&str, Option<&str>)]) -> Vec<String> {
        self.args
            .iter()
            .filter_map(|template| {
                let rendered = substitute(template, vars);
                (!rendered.trim().is_empty() || template.trim().is_empty()).then_some(rendered)
            })
            .collect()
    }
}

/// Replace each `{key}` in `template` with its value in one left-to-right
/// pass. Substituted text is never rescanned; unknown keys stay literal.
fn substitute(template: &str, vars: &[(&str, Option<&str>)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, value.unwrap_or("")))
        });
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn default_script_launcher() -> StepLauncher {
    StepLauncher::new("sh", &["{path}"])
}

fn default_declarative_launcher() -> StepLauncher {
    StepLauncher::new("sh", &["{path}"])
}

fn default_policy_compile_launcher() -> StepLauncher {
    StepLauncher::new("sh", &["{module}", "{data}", "{output}"])
}

fn default_local_policy_launcher() -> StepLauncher {
    StepLauncher::new("sh", &["{path}"])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLaunchers {
    #[serde(default = "default_policy_compile_launcher")]
    pub policy_compile: StepLauncher,
    #[serde(default = "default_script_launcher")]
    pub script: StepLauncher,
    #[serde(default = "default_declarative_launcher")]
    pub declarative_apply: StepLauncher,
    #[serde(default = "default_local_policy_launcher")]
    pub local_policy_apply: StepLauncher,
}

impl Default for StepLaunchers {
    fn default() -> Self {
        Self {
            policy_compile: default_policy_compile_launcher(),
            script: default_script_launcher(),
            declarative_apply: default_declarative_launcher(),
            local_policy_apply: default_local_policy_launcher(),
        }
    }
}

impl StepLaunchers {
    /// Template import runs in-process and has no launcher.
    pub const fn for_step(&self, step: StepName) -> Option<&StepLauncher> {
        match step {
            StepName::PolicyCompile => Some(&self.policy_compile),
            StepName::Script => Some(&self.script),
            StepName::DeclarativeApply => Some(&self.declarative_apply),
            StepName::LocalPolicyApply => Some(&self.local_policy_apply),
            StepName::TemplateImport => None,
        }
    }
}

fn default_script_secs() -> u64 {
    30
}

fn default_declarative_apply_secs() -> u64 {
    600
}

fn default_policy_compile_secs() -> u64 {
    300
}

fn default_local_policy_apply_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTimeouts {
    #[serde(default = "default_policy_compile_secs")]
    pub policy_compile_secs: u64,
    #[serde(default = "default_script_secs")]
    pub script_secs: u64,
    #[serde(default = "default_declarative_apply_secs")]
    pub declarative_apply_secs: u64,
    #[serde(default = "default_local_policy_apply_secs")]
    pub local_policy_apply_secs: u64,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            policy_compile_secs: default_policy_compile_secs(),
            script_secs: default_script_secs(),
            declarative_apply_secs: default_declarative_apply_secs(),
            local_policy_apply_secs: default_local_policy_apply_secs(),
        }
    }
}

impl StepTimeouts {
    pub const fn for_step(&self, step: StepName) -> Option<Duration> {
        let secs = match step {
            StepName::PolicyCompile => self.policy_compile_secs,
            StepName::Script => self.script_secs,
            StepName::DeclarativeApply => self.declarative_apply_secs,
            StepName::LocalPolicyApply => self.local_policy_apply_secs,
            StepName::TemplateImport => return None,
        };
        Some(Duration::from_secs(secs))
    }
}

fn default_template_extensions() -> Vec<String> {
    vec!["admx".into(), "adml".into(), "inf".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default)]
    pub timeouts: StepTimeouts,
    #[serde(default)]
    pub launchers: StepLaunchers,
    /// File extensions (without dot, case-insensitive) copied by template import.
    #[serde(default = "default_template_extensions")]
    pub template_extensions: Vec<String>,
    #[serde(default)]
    pub restore_configuration_manager: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeouts: StepTimeouts::default(),
            launchers: StepLaunchers::default(),
            template_extensions: default_template_extensions(),
            restore_configuration_manager: false,
        }
    }
}

impl ApplyConfig {
    pub fn validate(&self) -> Result<()> {
        for step in StepName::ORDER {
            if self
                .timeouts
                .for_step(step)
                .is_some_and(|timeout| timeout.is_zero())
            {
                bail!("apply.timeouts: {step} timeout must be greater than zero");
            }
            if let Some(launcher) = self.launchers.for_step(step)
                && launcher.program.trim().is_empty()
            {
                bail!("apply.launchers: {step} launcher program cannot be empty");
            }
        }
        if self.template_extensions.is_empty() {
            bail!("apply.template_extensions cannot be empty");
        }
        Ok(())
    }
}
