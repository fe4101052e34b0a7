use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

use dominion::context::RunContext;
use dominion::defaults;
use dominion::executor::{Executor, PipelineRunResult};
use dominion::log_status;
use dominion::notify;
use dominion::pipeline;
use dominion::shell::ShellRunner;
use dominion::trigger::{self, Trigger};

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline file (defaults to the configured pipeline_file)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Target environment: dev, qa, uat or prod
    #[arg(short, long, conflicts_with = "event")]
    pub environment: Option<String>,

    /// Image tag to publish; a timestamp tag is generated when omitted
    #[arg(long, conflicts_with = "event")]
    pub image_version: Option<String>,

    /// Simulate a repository event instead of a manual run
    #[arg(long, value_parser = ["push", "pull_request"], requires = "branch")]
    pub event: Option<String>,

    /// Branch the event happened on
    #[arg(long, requires = "event")]
    pub branch: Option<String>,

    /// Render every step without executing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    command: String,
    path: String,
    triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<PipelineRunResult>,
}

pub fn run(args: RunArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let defaults = defaults::load_defaults();
    let path = super::pipeline_path(args.file, &defaults);
    let pipeline = pipeline::load(&path)?;

    let trigger = match (args.event, args.branch) {
        (Some(event), Some(branch)) => Trigger::event(&event, branch)?,
        (Some(_), None) => {
            return Err(dominion::Error::validation_missing_argument(vec![
                "branch".to_string(),
            ]))
        }
        _ => Trigger::Manual {
            environment: args.environment,
            image_version: args.image_version,
        },
    };

    let Some(inputs) = trigger::resolve_inputs(
        &trigger,
        &pipeline.on,
        defaults.default_environment,
        chrono::Utc::now(),
    )?
    else {
        log_status!("run", "{} does not match any trigger filter", trigger.kind());
        return Ok((
            RunOutput {
                command: "run".to_string(),
                path: path.display().to_string(),
                triggered: false,
                reason: Some(format!(
                    "No '{}' trigger matches this branch",
                    trigger.kind()
                )),
                run: None,
            },
            0,
        ));
    };

    let ctx = RunContext::new(&pipeline.name, inputs, &defaults);
    let notifier = notify::from_policy(pipeline.notify.as_ref(), &defaults.notify)?;
    let runner = ShellRunner;

    let result = Executor::new(&runner, notifier.as_ref())
        .workdir(workdir_for(&path))
        .dry_run(args.dry_run)
        .run(&pipeline, ctx)?;

    let exit_code = exit_code_for(&result);

    Ok((
        RunOutput {
            command: "run".to_string(),
            path: path.display().to_string(),
            triggered: true,
            reason: None,
            run: Some(result),
        },
        exit_code,
    ))
}

/// A run that completed with status `failed` exits 1.
fn exit_code_for(result: &PipelineRunResult) -> i32 {
    if result.succeeded() {
        0
    } else {
        1
    }
}

/// Steps run next to the pipeline file.
fn workdir_for(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
