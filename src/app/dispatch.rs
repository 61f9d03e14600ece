use crate::cli::commands::{ApplyArgs, Cli, Commands};
use anyhow::{Context, Result};
use std::path::Path;
use stigapply::Config;
use stigapply::apply::{ApplyResult, ApplyRunner, Collaborators};
use stigapply::preflight::{PreflightRequest, PreflightRunner};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::status::{render_result, render_status};

/// Cancel the run on Ctrl-C; the step in flight still finishes or times out.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping before the next step");
            child.cancel();
        }
    });
    token
}

async fn run_apply(config: &Config, args: ApplyArgs) -> Result<()> {
    let request = args.into_request();
    let collaborators = Collaborators::file_backed(config, &request.bundle_root);
    let runner = ApplyRunner::new(config.apply.clone(), collaborators);
    let cancel = cancel_on_ctrl_c();

    let result: ApplyResult = runner.run_with_cancel(&request, &cancel).await?;
    println!("{}", render_result(&result));
    if result.reboot_pending {
        info!(run_id = %result.run_id, "reboot the host, then run the same apply command again to resume");
    }
    Ok(())
}

async fn run_preflight(
    config: &Config,
    bundle: &Path,
    script: Option<&Path>,
    json: bool,
) -> Result<()> {
    let runner = PreflightRunner::new(config.preflight.clone());
    let result = runner
        .run_preflight(&PreflightRequest {
            bundle_root: bundle.to_path_buf(),
            script: script.map(Path::to_path_buf),
        })
        .await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize preflight result")?
        );
    } else {
        println!("preflight: {}", if result.ok { "ready" } else { "not ready" });
        for issue in &result.issues {
            println!("  - {issue}");
        }
    }

    if !result.ok {
        anyhow::bail!(
            "preflight reported the host is not ready (exit code {})",
            result.exit_code
        );
    }
    Ok(())
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Apply(args) => run_apply(&config, args).await,
        Commands::Preflight {
            bundle,
            script,
            json,
        } => run_preflight(&config, &bundle, script.as_deref(), json).await,
        Commands::Status { bundle, json } => {
            if json {
                let layout = stigapply::apply::BundleLayout::new(&bundle);
                match stigapply::apply::read_latest_summary(&layout) {
                    Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                    None => println!("null"),
                }
            } else {
                println!("{}", render_status(&config, &bundle));
            }
            Ok(())
        }
    }
}
