//! Per-run variables, step outputs and the environment exported to steps.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::defaults::Defaults;
use crate::pipeline::Stage;
use crate::tag;
use crate::trigger::RunInputs;

/// Name of the env var pointing at the file a step writes `key=value` outputs to.
pub const OUTPUT_FILE_ENV: &str = "DOMINION_OUTPUT";

pub type Outputs = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub pipeline: String,
    pub inputs: RunInputs,
    pub vars: BTreeMap<String, String>,
    /// Outputs of finished stages, keyed by stage id.
    pub stage_outputs: BTreeMap<String, Outputs>,
}

impl RunContext {
    pub fn new(pipeline: &str, inputs: RunInputs, defaults: &Defaults) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let environment = inputs.environment;
        let image = tag::image_reference(
            &defaults.image.registry,
            &defaults.image.repository,
            &inputs.image_tag.value,
        );

        let mut vars = BTreeMap::new();
        vars.insert("run_id".to_string(), run_id.clone());
        vars.insert("pipeline".to_string(), pipeline.to_string());
        vars.insert("trigger".to_string(), inputs.trigger.clone());
        vars.insert(
            "branch".to_string(),
            inputs.branch.clone().unwrap_or_default(),
        );
        vars.insert("environment".to_string(), environment.to_string());
        vars.insert(
            "cluster".to_string(),
            environment.cluster_name(&defaults.cluster.suffix),
        );
        vars.insert(
            "overlay_dir".to_string(),
            environment
                .overlay_dir(&defaults.cluster.overlay_root)
                .display()
                .to_string(),
        );
        vars.insert("registry".to_string(), defaults.image.registry.clone());
        vars.insert("repository".to_string(), defaults.image.repository.clone());
        vars.insert("image_tag".to_string(), inputs.image_tag.value.clone());
        vars.insert("image".to_string(), image);

        Self {
            run_id,
            pipeline: pipeline.to_string(),
            inputs,
            vars,
            stage_outputs: BTreeMap::new(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Variables visible to steps of `stage`: run vars, `needs.<stage>.<key>`
    /// for each dependency, and `steps.<id>.<key>` for earlier steps.
    pub fn stage_vars(&self, stage: &Stage, step_outputs: &BTreeMap<String, Outputs>) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for need in &stage.needs {
            if let Some(outputs) = self.stage_outputs.get(need) {
                for (key, value) in outputs {
                    vars.insert(format!("needs.{}.{}", need, key), value.clone());
                }
            }
        }

        for (step_id, outputs) in step_outputs {
            for (key, value) in outputs {
                vars.insert(format!("steps.{}.{}", step_id, key), value.clone());
            }
        }

        vars
    }

    /// `DOMINION_*` variables exported to every step.
    pub fn env(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(key, value)| (format!("DOMINION_{}", key.to_uppercase()), value.clone()))
            .collect()
    }

    pub fn record_stage_outputs(&mut self, stage_id: &str, outputs: Outputs) {
        self.stage_outputs.insert(stage_id.to_string(), outputs);
    }
}

/// Parse a step output file: one `key=value` per line, blank lines and `#` comments ignored.
pub fn parse_outputs(content: &str) -> Outputs {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Read outputs a step wrote; a missing file means no outputs.
pub fn read_outputs(path: &Path) -> Outputs {
    std::fs::read_to_string(path)
        .map(|content| parse_outputs(&content))
        .unwrap_or_default()
}
