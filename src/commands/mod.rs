use std::path::PathBuf;

use dominion::defaults::Defaults;

pub type CmdResult<T> = dominion::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

/// Pipeline file from `--file`, or the configured default.
pub(crate) fn pipeline_path(file: Option<PathBuf>, defaults: &Defaults) -> PathBuf {
    file.unwrap_or_else(|| PathBuf::from(shellexpand::tilde(&defaults.pipeline_file).to_string()))
}

pub mod config;
pub mod envs;
pub mod init;
pub mod plan;
pub mod run;
pub mod tag;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (dominion::Result<serde_json::Value>, i32) {
    crate::tty::status("dominion is working...");

    match command {
        // Commands without global context
        crate::Commands::Tag(args) => dispatch!(args, tag),
        crate::Commands::Envs => crate::output::map_cmd_result_to_json(envs::run()),

        // Commands with global context
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Init(args) => dispatch!(args, global, init),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_wins_over_default() {
        let defaults = Defaults::default();
        assert_eq!(
            pipeline_path(Some(PathBuf::from("ci/custom.yml")), &defaults),
            PathBuf::from("ci/custom.yml")
        );
        assert_eq!(pipeline_path(None, &defaults), PathBuf::from("dominion.yml"));
    }
}
