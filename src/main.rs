use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{config, envs, init, plan, run, tag};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "dominion")]
#[command(version = VERSION)]
#[command(about = "Build, publish and deploy container images through staged pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run(run::RunArgs),
    /// Validate a pipeline and show its stage order
    Plan(plan::PlanArgs),
    /// Resolve the image tag a run would use
    Tag(tag::TagArgs),
    /// List deployment environments and their clusters
    Envs,
    /// Write the standard pipeline file
    Init(init::InitArgs),
    /// Manage global dominion configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
