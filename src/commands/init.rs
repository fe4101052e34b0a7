use clap::Args;
use std::path::PathBuf;

use dominion::defaults;
use dominion::scaffold::{self, InitResult};

use super::CmdResult;

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the pipeline (defaults to the configured pipeline_file)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Overwrite an existing pipeline file
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<InitResult> {
    let defaults = defaults::load_defaults();
    let path = super::pipeline_path(args.file, &defaults);
    Ok((scaffold::init(&path, &defaults, args.force)?, 0))
}
