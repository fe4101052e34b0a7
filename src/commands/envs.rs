use serde::Serialize;

use dominion::defaults;
use dominion::environment::Environment;

use super::CmdResult;

#[derive(Debug, Serialize)]
pub struct EnvironmentInfo {
    name: Environment,
    cluster: String,
    overlay_dir: String,
    default: bool,
}

#[derive(Debug, Serialize)]
pub struct EnvsOutput {
    command: String,
    environments: Vec<EnvironmentInfo>,
}

pub fn run() -> CmdResult<EnvsOutput> {
    let defaults = defaults::load_defaults();

    let environments = Environment::ALL
        .iter()
        .map(|env| EnvironmentInfo {
            name: *env,
            cluster: env.cluster_name(&defaults.cluster.suffix),
            overlay_dir: env
                .overlay_dir(&defaults.cluster.overlay_root)
                .display()
                .to_string(),
            default: *env == defaults.default_environment,
        })
        .collect();

    Ok((
        EnvsOutput {
            command: "envs".to_string(),
            environments,
        },
        0,
    ))
}
