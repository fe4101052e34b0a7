use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use dominion::actions::BuiltinActions;
use dominion::defaults;
use dominion::pipeline::{self, PipelinePlan};
use dominion::trigger::TriggerConfig;

use super::CmdResult;

#[derive(Args)]
pub struct PlanArgs {
    /// Pipeline file (defaults to the configured pipeline_file)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct SecretStatus {
    name: String,
    set: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    command: String,
    path: String,
    on: TriggerConfig,
    secrets: Vec<SecretStatus>,
    plan: PipelinePlan,
}

pub fn run(args: PlanArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<PlanOutput> {
    let defaults = defaults::load_defaults();
    let path = super::pipeline_path(args.file, &defaults);
    let pipeline = pipeline::load(&path)?;
    let plan = pipeline::validate(&pipeline, &BuiltinActions::default())?;

    let secrets = pipeline
        .secrets
        .iter()
        .map(|name| SecretStatus {
            name: name.clone(),
            set: std::env::var(name).is_ok_and(|v| !v.is_empty()),
        })
        .collect();

    Ok((
        PlanOutput {
            command: "plan".to_string(),
            path: path.display().to_string(),
            on: pipeline.on,
            secrets,
            plan,
        },
        0,
    ))
}
