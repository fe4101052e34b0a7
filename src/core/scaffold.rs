//! The standard build-and-deploy pipeline, generated from configured defaults.

use serde::Serialize;
use std::path::Path;

use crate::actions;
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::notify::{NotifyOn, NotifyPolicy};
use crate::pipeline::{self, Pipeline, Stage, Step, StepCondition};
use crate::trigger::{EventFilter, TriggerConfig};
use crate::utils::{io, template};

pub const BUILD_STAGE: &str = "build-and-push";
pub const DEPLOY_STAGE: &str = "deploy";

pub fn standard_pipeline(defaults: &Defaults) -> Pipeline {
    let main = EventFilter {
        branches: vec!["main".to_string()],
    };

    Pipeline {
        name: "dominion".to_string(),
        on: TriggerConfig {
            manual: true,
            push: Some(main.clone()),
            pull_request: Some(main),
        },
        secrets: defaults.secrets.clone(),
        notify: Some(NotifyPolicy {
            webhook_env: None,
            on: vec![NotifyOn::Always],
            stages: false,
        }),
        stages: vec![build_stage(defaults), deploy_stage(defaults)],
    }
}

fn build_stage(defaults: &Defaults) -> Stage {
    let build = &defaults.build;
    let mut steps = vec![
        Step::uses("Resolve image tag", actions::IMAGE_TAG).with_id("tag"),
        Step::run("Registry login", &build.registry_login_command)
            .with_diagnostic("Could not log in to the container registry"),
        Step::run("Build", &build.build_command),
        Step::run("Static analysis", &build.scan_command),
        Step::run("Build image", &build.image_build_command),
        Step::run("Push image", &build.push_command),
    ];

    for (index, command) in build.cleanup_commands.iter().enumerate() {
        steps.push(
            Step::run(format!("Cleanup {}", index + 1), command)
                .when(StepCondition::Always)
                .allow_failure(),
        );
    }

    Stage {
        id: BUILD_STAGE.to_string(),
        label: Some("Build and push".to_string()),
        needs: Vec::new(),
        timeout_minutes: Some(build.timeout_minutes),
        steps,
    }
}

fn deploy_stage(defaults: &Defaults) -> Stage {
    let cluster = &defaults.cluster;
    let image_ref = format!("{{{{needs.{}.image}}}}", BUILD_STAGE);

    let mut steps = vec![
        Step::uses("Authenticate to cluster", actions::CLUSTER_AUTH)
            .with_arg("command", &cluster.auth_command)
            .with_arg("cluster", "{{cluster}}"),
        Step::uses("Check overlay", actions::REQUIRE_DIR).with_arg("path", "{{overlay_dir}}"),
    ];

    for addon in &cluster.addons {
        let command = template::render(
            &cluster.addon_apply_command,
            &[("manifest", addon.manifest.as_str())],
        );
        steps.push(Step::run(format!("Apply {} add-on", addon.name), command));
    }

    let set_image =
        template::render(&cluster.set_image_command, &[("image", image_ref.as_str())]);
    steps.push(Step::run("Set image", set_image));
    steps.push(Step::run("Apply overlay", &cluster.apply_command));

    Stage {
        id: DEPLOY_STAGE.to_string(),
        label: Some("Deploy".to_string()),
        needs: vec![BUILD_STAGE.to_string()],
        timeout_minutes: None,
        steps,
    }
}

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub path: String,
    pub overwritten: bool,
    pub stages: Vec<String>,
}

/// Write the standard pipeline to `path`. Refuses to replace an existing file unless `force`.
pub fn init(path: &Path, defaults: &Defaults, force: bool) -> Result<InitResult> {
    let exists = path.exists();
    if exists && !force {
        return Err(Error::validation_invalid_argument(
            "file",
            format!("{} already exists", path.display()),
            None,
            None,
        )
        .with_hint("Pass --force to overwrite it"));
    }

    let pipeline = standard_pipeline(defaults);
    let yaml = pipeline::to_yaml(&pipeline)?;
    io::write_file_atomic(path, &yaml, "write pipeline file")?;
    log_status!("init", "Wrote {}", path.display());

    Ok(InitResult {
        path: path.display().to_string(),
        overwritten: exists,
        stages: pipeline.stages.iter().map(|s| s.id.clone()).collect(),
    })
}
