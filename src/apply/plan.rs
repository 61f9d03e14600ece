use super::layout::BundleLayout;
use super::types::{ApplyRequest, StepName};
use std::path::PathBuf;

/// One configured step with the inputs it runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    PolicyCompile {
        module: PathBuf,
        data: Option<PathBuf>,
        output: PathBuf,
    },
    Script {
        path: PathBuf,
    },
    DeclarativeApply {
        manifest: PathBuf,
    },
    TemplateImport {
        root: PathBuf,
    },
    LocalPolicyApply {
        object: PathBuf,
    },
}

impl PlannedStep {
    pub const fn name(&self) -> StepName {
        match self {
            Self::PolicyCompile { .. } => StepName::PolicyCompile,
            Self::Script { .. } => StepName::Script,
            Self::DeclarativeApply { .. } => StepName::DeclarativeApply,
            Self::TemplateImport { .. } => StepName::TemplateImport,
            Self::LocalPolicyApply { .. } => StepName::LocalPolicyApply,
        }
    }
}

/// Steps of one attempt, fixed in execution order when built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyPlan {
    steps: Vec<PlannedStep>,
}

impl ApplyPlan {
    /// A step is planned only when the request names its tool.
    pub fn from_request(request: &ApplyRequest, layout: &BundleLayout) -> Self {
        let mut steps = Vec::with_capacity(StepName::ORDER.len());

        if let Some(module) = &request.policy_module_path {
            steps.push(PlannedStep::PolicyCompile {
                module: module.clone(),
                data: request.policy_data_path.clone(),
                output: request
                    .policy_output_path
                    .clone()
                    .unwrap_or_else(|| layout.compiled_dir()),
            });
        }
        if let Some(path) = &request.script_path {
            steps.push(PlannedStep::Script { path: path.clone() });
        }
        if let Some(manifest) = &request.dsc_manifest_path {
            steps.push(PlannedStep::DeclarativeApply {
                manifest: manifest.clone(),
            });
        }
        if let Some(root) = &request.template_root {
            steps.push(PlannedStep::TemplateImport { root: root.clone() });
        }
        if let Some(object) = &request.local_policy_path {
            steps.push(PlannedStep::LocalPolicyApply {
                object: object.clone(),
            });
        }

        Self { steps }
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn names(&self) -> Vec<StepName> {
        self.steps.iter().map(PlannedStep::name).collect()
    }

    pub fn contains(&self, step: StepName) -> bool {
        self.steps.iter().any(|planned| planned.name() == step)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn policy_output(&self) -> Option<&PathBuf> {
        self.steps.iter().find_map(|step| match step {
            PlannedStep::PolicyCompile { output, .. } => Some(output),
            _ => None,
        })
    }
}
