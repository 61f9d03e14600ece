use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stigapply::apply::{ApplyRequest, HardeningMode, StepVerbosity};

/// `stigapply` - apply a hardening bundle to this host, surviving reboots.
#[derive(Parser, Debug)]
#[command(name = "stigapply")]
#[command(version)]
#[command(about = "Apply a host hardening bundle step by step.", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) an apply attempt against a bundle
    Apply(ApplyArgs),

    /// Run the bundle's readiness check
    Preflight {
        /// Bundle root directory
        bundle: PathBuf,

        /// Readiness script (overrides [preflight] script)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show checkpoint, lock and last-run state for a bundle
    Status {
        /// Bundle root directory
        bundle: PathBuf,

        /// Print the latest run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Bundle root directory
    pub bundle: PathBuf,

    /// Hardening mode (audit-only, safe, full); defaults to the bundle manifest
    #[arg(long)]
    pub mode: Option<HardeningMode>,

    /// Hardening script to execute
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Declarative configuration to apply
    #[arg(long)]
    pub dsc_manifest: Option<PathBuf>,

    /// Policy compiler module
    #[arg(long)]
    pub policy_module: Option<PathBuf>,

    /// Data file passed to the policy compiler
    #[arg(long, requires = "policy_module")]
    pub policy_data: Option<PathBuf>,

    /// Output directory for compiled policy (default: <bundle>/Apply/Compiled)
    #[arg(long, requires = "policy_module")]
    pub policy_output: Option<PathBuf>,

    /// Template tree to import
    #[arg(long)]
    pub template_root: Option<PathBuf>,

    /// Local policy object file to import
    #[arg(long)]
    pub local_policy: Option<PathBuf>,

    /// Apply without a pre-apply snapshot (no rollback script is produced)
    #[arg(long)]
    pub skip_snapshot: bool,

    /// Reset the configuration manager to its prior state afterwards
    #[arg(long)]
    pub restore_configuration_manager: bool,

    /// Run id (letters, digits, '.', '_' and '-'); generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,

    /// Earlier run to compare step artifacts against
    #[arg(long)]
    pub prior_run_id: Option<String>,

    #[arg(long)]
    pub verbose_policy_compile: bool,

    #[arg(long)]
    pub verbose_script: bool,

    #[arg(long)]
    pub verbose_dsc: bool,

    #[arg(long)]
    pub verbose_local_policy: bool,
}

impl ApplyArgs {
    pub fn into_request(self) -> ApplyRequest {
        ApplyRequest {
            bundle_root: self.bundle,
            mode_override: self.mode,
            script_path: self.script,
            dsc_manifest_path: self.dsc_manifest,
            policy_module_path: self.policy_module,
            policy_data_path: self.policy_data,
            policy_output_path: self.policy_output,
            template_root: self.template_root,
            local_policy_path: self.local_policy,
            verbosity: StepVerbosity {
                policy_compile: self.verbose_policy_compile,
                script: self.verbose_script,
                declarative_apply: self.verbose_dsc,
                local_policy_apply: self.verbose_local_policy,
            },
            skip_snapshot: self.skip_snapshot,
            restore_configuration_manager: self.restore_configuration_manager.then_some(true),
            run_id: self.run_id,
            prior_run_id: self.prior_run_id,
        }
    }
}
