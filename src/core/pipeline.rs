use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::notify::NotifyPolicy;
use crate::trigger::TriggerConfig;
use crate::utils::io;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(rename = "on", default)]
    pub on: TriggerConfig,
    /// Environment variables that must be set before any stage runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyPolicy>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Addressable id for `{{steps.<id>.<key>}}` output references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
    #[serde(rename = "if", default, skip_serializing_if = "StepCondition::is_default")]
    pub condition: StepCondition,
    /// Record a failure as a warning instead of failing the stage.
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Message reported instead of the raw command error when this step fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Step {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            run: Some(command.into()),
            uses: None,
            with: BTreeMap::new(),
            condition: StepCondition::Success,
            continue_on_error: false,
            env: BTreeMap::new(),
            diagnostic: None,
        }
    }

    pub fn uses(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            run: None,
            uses: Some(action.into()),
            ..Self::run(name, "")
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostic = Some(message.into());
        self
    }

    pub fn kind(&self) -> &str {
        self.uses.as_deref().unwrap_or("run")
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// When a step runs relative to earlier failures in its stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    /// Only while nothing in the stage has failed.
    #[default]
    Success,
    /// Only after a failure in the stage.
    Failure,
    /// Regardless of earlier failures.
    Always,
}

impl StepCondition {
    fn is_default(&self) -> bool {
        *self == StepCondition::Success
    }

    pub fn should_run(&self, stage_failed: bool) -> bool {
        match self {
            StepCondition::Success => !stage_failed,
            StepCondition::Failure => stage_failed,
            StepCondition::Always => true,
        }
    }
}

/// Reports which `uses:` actions can be executed.
pub trait CapabilityResolver: Send + Sync {
    fn is_supported(&self, action: &str) -> bool;
    /// Every action name the resolver accepts.
    fn available(&self) -> Vec<String>;
    /// Required `with:` keys the step does not provide.
    fn missing_args(&self, action: &str, with: &BTreeMap<String, String>) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    pub name: String,
    pub stages: Vec<PlanStage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStage {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub name: String,
    pub kind: String,
    pub condition: StepCondition,
    pub continue_on_error: bool,
}

/// Read a pipeline definition. `.json` files are parsed as JSON, everything else as YAML.
pub fn load(path: &Path) -> Result<Pipeline> {
    if !path.exists() {
        return Err(Error::pipeline_not_found(path.display().to_string()));
    }

    let content = io::read_file(path, &format!("read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
    } else {
        parse_yaml(&content, &path.display().to_string())
    }
}

pub fn from_yaml(content: &str) -> Result<Pipeline> {
    parse_yaml(content, "<inline>")
}

fn parse_yaml(content: &str, origin: &str) -> Result<Pipeline> {
    serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(origin, e.to_string()))
}

pub fn to_yaml(pipeline: &Pipeline) -> Result<String> {
    serde_yml::to_string(pipeline)
        .map_err(|e| Error::internal_unexpected(format!("serialize pipeline: {}", e)))
}

/// Check structure and action references, returning stages in execution order.
pub fn validate(pipeline: &Pipeline, resolver: &dyn CapabilityResolver) -> Result<PipelinePlan> {
    if pipeline.name.trim().is_empty() {
        return Err(Error::pipeline_invalid("name", "Pipeline name is empty"));
    }
    if pipeline.stages.is_empty() {
        return Err(Error::pipeline_invalid("stages", "Pipeline has no stages"));
    }

    for stage in &pipeline.stages {
        validate_stage(stage, resolver)?;
    }

    let (ordered, warnings) = order_stages(&pipeline.stages)?;

    Ok(PipelinePlan {
        name: pipeline.name.clone(),
        stages: ordered.iter().map(to_plan_stage).collect(),
        warnings,
    })
}

fn validate_stage(stage: &Stage, resolver: &dyn CapabilityResolver) -> Result<()> {
    let field = format!("stages.{}", stage.id);

    if stage.id.trim().is_empty() {
        return Err(Error::pipeline_invalid("stages", "Stage id is empty"));
    }
    if stage.steps.is_empty() {
        return Err(Error::pipeline_invalid(
            field,
            format!("Stage '{}' has no steps", stage.id),
        ));
    }
    if stage.timeout_minutes == Some(0) {
        return Err(Error::pipeline_invalid(
            field,
            format!("Stage '{}' has a zero timeout", stage.id),
        ));
    }

    let mut step_ids = HashSet::new();
    for step in &stage.steps {
        if let Some(id) = &step.id {
            if !step_ids.insert(id.as_str()) {
                return Err(Error::pipeline_invalid(
                    field,
                    format!("Duplicate step id '{}' in stage '{}'", id, stage.id),
                ));
            }
        }

        match (&step.run, &step.uses) {
            (Some(command), None) => {
                if command.trim().is_empty() {
                    return Err(Error::pipeline_invalid(
                        field,
                        format!("Step '{}' has an empty command", step.name),
                    ));
                }
            }
            (None, Some(action)) => {
                if !resolver.is_supported(action) {
                    return Err(Error::pipeline_invalid(
                        field,
                        format!(
                            "Step '{}' uses unknown action '{}' (available: {})",
                            step.name,
                            action,
                            resolver.available().join(", ")
                        ),
                    ));
                }
                let missing = resolver.missing_args(action, &step.with);
                if !missing.is_empty() {
                    return Err(Error::pipeline_invalid(
                        field,
                        format!(
                            "Step '{}' is missing required inputs: {}",
                            step.name,
                            missing.join(", ")
                        ),
                    ));
                }
            }
            _ => {
                return Err(Error::pipeline_invalid(
                    field,
                    format!(
                        "Step '{}' must set exactly one of 'run' or 'uses'",
                        step.name
                    ),
                ))
            }
        }
    }

    Ok(())
}

/// Topologically order stages by `needs`, keeping declaration order among peers.
pub fn order_stages(stages: &[Stage]) -> Result<(Vec<Stage>, Vec<String>)> {
    let mut id_index = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if id_index.contains_key(&stage.id) {
            return Err(Error::pipeline_invalid(
                "stages",
                format!("Duplicate stage id '{}'", stage.id),
            ));
        }
        id_index.insert(stage.id.clone(), idx);
    }

    let mut indegree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];

    for (idx, stage) in stages.iter().enumerate() {
        for need in &stage.needs {
            if let Some(&parent_idx) = id_index.get(need) {
                indegree[idx] += 1;
                dependents[parent_idx].push(idx);
            } else {
                return Err(Error::pipeline_invalid(
                    format!("stages.{}.needs", stage.id),
                    format!("Stage '{}' depends on unknown stage '{}'", stage.id, need),
                ));
            }
        }
    }

    let mut queue = VecDeque::new();
    for (idx, count) in indegree.iter().enumerate() {
        if *count == 0 {
            queue.push_back(idx);
        }
    }

    let mut ordered = Vec::with_capacity(stages.len());
    let mut positions = Vec::with_capacity(stages.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(stages[idx].clone());
        positions.push(idx);
        for &child in &dependents[idx] {
            if indegree[child] > 0 {
                indegree[child] -= 1;
            }
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != stages.len() {
        let pending: Vec<String> = stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, stage)| stage.id.clone())
            .collect();
        return Err(Error::pipeline_cycle(pending));
    }

    let mut warnings = Vec::new();
    if positions.windows(2).any(|w| w[0] > w[1]) {
        warnings.push("Stages reordered based on dependencies".to_string());
    }

    Ok((ordered, warnings))
}

fn to_plan_stage(stage: &Stage) -> PlanStage {
    PlanStage {
        id: stage.id.clone(),
        needs: stage.needs.clone(),
        timeout_minutes: stage.timeout_minutes,
        steps: stage
            .steps
            .iter()
            .map(|step| PlanStep {
                name: step.name.clone(),
                kind: step.kind().to_string(),
                condition: step.condition,
                continue_on_error: step.continue_on_error,
            })
            .collect(),
    }
}
