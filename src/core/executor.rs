//! Pipeline execution.
//!
//! Stages run one at a time in dependency order. Inside a stage, steps run in
//! declaration order:
//! - a failing step fails the stage; later `success` steps are skipped
//! - `failure` and `always` steps still run after a failure, without the
//!   stage deadline
//! - `continue_on_error` failures are kept as warnings
//!
//! A stage whose dependency did not succeed is skipped. Notifier errors are
//! warnings and never change the outcome.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::actions::{ActionRequest, BuiltinActions};
use crate::context::{self, Outputs, RunContext, OUTPUT_FILE_ENV};
use crate::error::{Error, ErrorCode, Hint, Result, StageFailedDetails};
use crate::notify::{Notification, Notifier, NotifyPolicy};
use crate::pipeline::{self, Pipeline, Stage, Step};
use crate::shell::{self, CommandOutput, CommandRunner, CommandSpec};
use crate::trigger::RunInputs;
use crate::utils::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    /// Failed, but `continue_on_error` kept the stage going.
    Suppressed,
    TimedOut,
    Skipped,
    /// Dry run: rendered, not executed.
    Planned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    TimedOut,
    Skipped,
    Planned,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
            StageStatus::TimedOut => "timed_out",
            StageStatus::Skipped => "skipped",
            StageStatus::Planned => "planned",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Planned,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Planned => "planned",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl StepError {
    fn from_error(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            hints: err.hints.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: Outputs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
}

impl StepResult {
    fn skipped(step: &Step) -> Self {
        Self {
            name: step.name.clone(),
            kind: step.kind().to_string(),
            status: StepStatus::Skipped,
            command: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            outputs: Outputs::new(),
            error: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub id: String,
    pub status: StageStatus,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: Outputs,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunResult {
    pub run_id: String,
    pub pipeline: String,
    pub inputs: RunInputs,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: RunSummary,
}

impl PipelineRunResult {
    pub fn succeeded(&self) -> bool {
        self.status != RunStatus::Failed
    }

    pub fn stage(&self, id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|stage| stage.id == id)
    }
}

/// Names of required secrets that `lookup` cannot provide.
pub fn missing_secrets(names: &[String], lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    names
        .iter()
        .filter(|name| lookup(name).is_none_or(|value| value.is_empty()))
        .cloned()
        .collect()
}

pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
    notifier: &'a dyn Notifier,
    actions: BuiltinActions,
    workdir: Option<PathBuf>,
    dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, notifier: &'a dyn Notifier) -> Self {
        Self {
            runner,
            notifier,
            actions: BuiltinActions::default(),
            workdir: None,
            dry_run: false,
        }
    }

    /// Directory steps run in. Defaults to the current directory.
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self, pipeline: &Pipeline, mut ctx: RunContext) -> Result<PipelineRunResult> {
        let plan = pipeline::validate(pipeline, &self.actions)?;
        let (ordered, _) = pipeline::order_stages(&pipeline.stages)?;
        let mut warnings = plan.warnings;

        let missing = missing_secrets(&pipeline.secrets, |name| std::env::var(name).ok());
        if !missing.is_empty() {
            if !self.dry_run {
                return Err(Error::pipeline_missing_secret(missing));
            }
            warnings.push(format!("Required secrets not set: {}", missing.join(", ")));
        }
        let secret_values: Vec<String> = pipeline
            .secrets
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .collect();

        log_status!(
            "run",
            "{} ({}) env={} tag={}",
            pipeline.name,
            ctx.run_id,
            ctx.inputs.environment,
            ctx.inputs.image_tag.value
        );

        let policy = pipeline.notify.as_ref();
        let mut results: Vec<StageResult> = Vec::with_capacity(ordered.len());

        for stage in &ordered {
            let blocked_by = stage.needs.iter().find(|need| {
                results
                    .iter()
                    .find(|r| &r.id == *need)
                    .is_none_or(|r| !matches!(r.status, StageStatus::Success | StageStatus::Planned))
            });

            let result = match blocked_by {
                Some(dep) => {
                    log_status!("run", "Skipping '{}': '{}' did not succeed", stage.id, dep);
                    StageResult {
                        id: stage.id.clone(),
                        status: StageStatus::Skipped,
                        steps: stage.steps.iter().map(StepResult::skipped).collect(),
                        outputs: Outputs::new(),
                        warnings: vec![format!("Skipped because '{}' did not succeed", dep)],
                        error: None,
                        duration_ms: 0,
                    }
                }
                None => self.run_stage(stage, &ctx, &secret_values),
            };

            if matches!(result.status, StageStatus::Success | StageStatus::Planned) {
                ctx.record_stage_outputs(&stage.id, result.outputs.clone());
            }

            if let Some(policy) = policy.filter(|p| p.stages) {
                if result.status != StageStatus::Skipped && !self.dry_run {
                    let succeeded = !result.status.is_failure();
                    let detail = result.error.as_ref().map(|e| e.message.clone());
                    self.send(
                        policy,
                        &ctx,
                        Some(stage.display_name()),
                        result.status.as_str(),
                        succeeded,
                        detail,
                        &mut warnings,
                    );
                }
            }

            results.push(result);
        }

        let status = if self.dry_run {
            RunStatus::Planned
        } else if results.iter().any(|r| r.status.is_failure()) {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        if let Some(policy) = policy {
            if !self.dry_run {
                let detail = results
                    .iter()
                    .find_map(|r| r.error.as_ref())
                    .map(|e| e.message.clone());
                self.send(
                    policy,
                    &ctx,
                    None,
                    status.as_str(),
                    status == RunStatus::Success,
                    detail,
                    &mut warnings,
                );
            }
        }

        let summary = build_summary(&results, status);
        log_status!("run", "{} finished: {}", pipeline.name, status.as_str());

        Ok(PipelineRunResult {
            run_id: ctx.run_id.clone(),
            pipeline: pipeline.name.clone(),
            inputs: ctx.inputs.clone(),
            status,
            stages: results,
            warnings,
            summary,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &self,
        policy: &NotifyPolicy,
        ctx: &RunContext,
        stage: Option<&str>,
        status: &str,
        succeeded: bool,
        detail: Option<String>,
        warnings: &mut Vec<String>,
    ) {
        if !policy.wants(succeeded) {
            return;
        }

        let notification = Notification {
            pipeline: ctx.pipeline.clone(),
            stage: stage.map(String::from),
            status: status.to_string(),
            succeeded,
            environment: ctx.inputs.environment.to_string(),
            image_tag: ctx.inputs.image_tag.value.clone(),
            run_id: ctx.run_id.clone(),
            detail,
        };

        if let Err(err) = self.notifier.notify(&notification) {
            log_status!("notify", "{}", err.message);
            warnings.push(err.message);
        }
    }

    fn run_stage(&self, stage: &Stage, ctx: &RunContext, secret_values: &[String]) -> StageResult {
        let started = Instant::now();
        // A timeout too large to represent is no deadline at all.
        let deadline = stage
            .timeout_minutes
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(|secs| started.checked_add(Duration::from_secs(secs)));

        log_status!("run", "Stage '{}' started", stage.id);

        let mut steps = Vec::with_capacity(stage.steps.len());
        let mut step_outputs: BTreeMap<String, Outputs> = BTreeMap::new();
        let mut stage_outputs = Outputs::new();
        let mut warnings = Vec::new();
        let mut failure: Option<(StageStatus, StepError)> = None;

        for (index, step) in stage.steps.iter().enumerate() {
            let stage_failed = failure.is_some();
            if !step.condition.should_run(stage_failed) {
                steps.push(StepResult::skipped(step));
                continue;
            }

            // Recovery steps are not bound by a deadline that may already be spent.
            let step_deadline = if stage_failed { None } else { deadline };
            let vars = ctx.stage_vars(stage, &step_outputs);
            let output_file = output_file_path(&ctx.run_id, &stage.id, index);

            let mut result = self.run_step(
                &stage.id,
                step,
                &vars,
                ctx,
                &output_file,
                step_deadline,
                secret_values,
            );

            if let Some(id) = &step.id {
                step_outputs.insert(id.clone(), result.outputs.clone());
            }
            stage_outputs.extend(result.outputs.clone());

            match result.status {
                StepStatus::Failed | StepStatus::TimedOut if step.continue_on_error => {
                    result.status = StepStatus::Suppressed;
                    let reason = result
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default();
                    log_status!("run", "Ignoring failure of '{}': {}", step.name, reason);
                    warnings.push(format!("Step '{}' failed (ignored): {}", step.name, reason));
                }
                StepStatus::TimedOut if failure.is_none() => {
                    let minutes = stage.timeout_minutes.unwrap_or_default();
                    let err = Error::stage_timeout(&stage.id, minutes);
                    failure = Some((StageStatus::TimedOut, StepError::from_error(&err)));
                }
                StepStatus::Failed | StepStatus::TimedOut if failure.is_none() => {
                    let error = result.error.clone().unwrap_or_else(|| StepError {
                        code: ErrorCode::StageFailed.as_str().to_string(),
                        message: format!("Step '{}' failed", step.name),
                        hints: Vec::new(),
                    });
                    failure = Some((StageStatus::Failed, error));
                }
                StepStatus::Failed | StepStatus::TimedOut => {
                    warnings.push(format!("Recovery step '{}' also failed", step.name));
                }
                _ => {}
            }

            steps.push(result);
        }

        let (status, error) = match failure {
            Some((status, error)) => (status, Some(error)),
            None if self.dry_run => (StageStatus::Planned, None),
            None => (StageStatus::Success, None),
        };

        log_status!("run", "Stage '{}' {}", stage.id, status.as_str());

        StageResult {
            id: stage.id.clone(),
            status,
            steps,
            outputs: stage_outputs,
            warnings,
            error,
            duration_ms: elapsed_ms(started),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_step(
        &self,
        stage_id: &str,
        step: &Step,
        vars: &HashMap<String, String>,
        ctx: &RunContext,
        output_file: &Path,
        deadline: Option<Instant>,
        secret_values: &[String],
    ) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult {
            name: step.name.clone(),
            kind: step.kind().to_string(),
            status: StepStatus::Success,
            command: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            outputs: Outputs::new(),
            error: None,
            duration_ms: 0,
        };

        let command = step.run.as_deref().map(|c| template::render_map(c, vars));
        let with: HashMap<String, String> = step
            .with
            .iter()
            .map(|(k, v)| (k.clone(), template::render_map(v, vars)))
            .collect();
        let step_env: Vec<(String, String)> = step
            .env
            .iter()
            .map(|(k, v)| (k.clone(), template::render_map(v, vars)))
            .collect();
        let mut env = ctx.env();
        env.extend(step_env.iter().cloned());
        env.push((
            OUTPUT_FILE_ENV.to_string(),
            output_file.display().to_string(),
        ));

        result.command = command.as_deref().map(|c| shell::redact(c, secret_values));

        if self.dry_run {
            result.status = StepStatus::Planned;
            return result;
        }

        let mut unresolved: Vec<String> = step
            .run
            .iter()
            .chain(step.with.values())
            .chain(step.env.values())
            .flat_map(|text| template::unresolved(text, vars))
            .collect();
        unresolved.sort();
        unresolved.dedup();
        if !unresolved.is_empty() {
            let err = Error::config_invalid_value(
                format!("steps.{}", step.name),
                Some(unresolved.join(", ")),
                "Unresolved template variables",
            );
            return self.fail(result, step, &err, started);
        }

        let _ = std::fs::remove_file(output_file);

        let outcome = match (&command, &step.uses) {
            (Some(command), _) => {
                log_status!("run", "→ {}", step.name);
                let output = self.runner.run(&CommandSpec {
                    command,
                    dir: self.workdir.as_deref(),
                    env: &env,
                    deadline,
                });
                Ok((Some(output), Outputs::new()))
            }
            (None, Some(action_name)) => match self.actions.get(action_name) {
                Some(action) => {
                    log_status!("run", "→ {} ({})", step.name, action_name);
                    action
                        .execute(&ActionRequest {
                            with: &with,
                            vars,
                            runner: self.runner,
                            dir: self.workdir.as_deref(),
                            env: &env,
                            deadline,
                        })
                        .map(|outcome| (outcome.output, outcome.outputs))
                }
                None => Err(Error::pipeline_invalid(
                    format!("steps.{}", step.name),
                    format!("Unknown action '{}'", action_name),
                )),
            },
            (None, None) => Err(Error::pipeline_invalid(
                format!("steps.{}", step.name),
                "Step has neither 'run' nor 'uses'",
            )),
        };

        let mut outputs = context::read_outputs(output_file);
        let _ = std::fs::remove_file(output_file);

        match outcome {
            Ok((output, action_outputs)) => {
                outputs.extend(action_outputs);
                result.outputs = redact_outputs(outputs, secret_values);
                if let Some(output) = output {
                    apply_output(&mut result, &output, secret_values);
                    if output.timed_out {
                        result.status = StepStatus::TimedOut;
                        let err = Error::new(
                            ErrorCode::StageTimeout,
                            format!("Step '{}' killed at stage timeout", step.name),
                            serde_json::Value::Null,
                        );
                        result.error = Some(StepError::from_error(&err));
                    } else if !output.success {
                        let err = step_failed_error(
                            stage_id,
                            step,
                            command.as_deref(),
                            &output,
                            secret_values,
                        );
                        return self.fail(result, step, &err, started);
                    }
                }
                result.duration_ms = elapsed_ms(started);
                result
            }
            Err(err) => {
                result.outputs = redact_outputs(outputs, secret_values);
                if err.code == ErrorCode::StageTimeout {
                    result.status = StepStatus::TimedOut;
                    result.error = Some(StepError::from_error(&err));
                    result.duration_ms = elapsed_ms(started);
                    return result;
                }
                self.fail(result, step, &err, started)
            }
        }
    }

    fn fail(&self, mut result: StepResult, step: &Step, err: &Error, started: Instant) -> StepResult {
        let mut error = StepError::from_error(err);
        if let Some(diagnostic) = &step.diagnostic {
            error.message = diagnostic.clone();
        }
        log_status!("run", "✗ {}: {}", step.name, error.message);
        result.status = StepStatus::Failed;
        result.error = Some(error);
        result.duration_ms = elapsed_ms(started);
        result
    }
}

fn apply_output(result: &mut StepResult, output: &CommandOutput, secret_values: &[String]) {
    result.exit_code = Some(output.exit_code);
    result.stdout = shell::redact(&output.stdout, secret_values);
    result.stderr = shell::redact(&output.stderr, secret_values);
}

fn redact_outputs(mut outputs: Outputs, secret_values: &[String]) -> Outputs {
    for value in outputs.values_mut() {
        *value = shell::redact(value, secret_values);
    }
    outputs
}

fn step_failed_error(
    stage_id: &str,
    step: &Step,
    command: Option<&str>,
    output: &CommandOutput,
    secret_values: &[String],
) -> Error {
    let stderr = shell::redact(output.error_text(), secret_values);
    let reason = last_line(&stderr).to_string();
    let mut err = Error::stage_failed(StageFailedDetails {
        stage: stage_id.to_string(),
        step: Some(step.name.clone()),
        command: command.map(|c| shell::redact(c, secret_values)),
        exit_code: output.exit_code,
        stdout: shell::redact(&output.stdout, secret_values),
        stderr,
    });
    if !reason.is_empty() {
        err.message = format!("{}: {}", err.message, reason);
    }
    err
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

fn output_file_path(run_id: &str, stage_id: &str, index: usize) -> PathBuf {
    let safe_stage: String = stage_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    std::env::temp_dir().join(format!("dominion-{}-{}-{}.out", run_id, safe_stage, index))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn build_summary(results: &[StageResult], status: RunStatus) -> RunSummary {
    let succeeded = results
        .iter()
        .filter(|r| r.status == StageStatus::Success)
        .count();
    let failed = results.iter().filter(|r| r.status.is_failure()).count();
    let skipped = results
        .iter()
        .filter(|r| r.status == StageStatus::Skipped)
        .count();

    let mut next_actions = Vec::new();
    if status == RunStatus::Failed {
        if results.iter().any(|r| {
            r.error
                .as_ref()
                .is_some_and(|e| e.code == ErrorCode::DeployOverlayMissing.as_str())
        }) {
            next_actions.push("Add the overlay directory for this environment".to_string());
        }
        if results.iter().any(|r| {
            r.error
                .as_ref()
                .is_some_and(|e| e.code == ErrorCode::DeployClusterAuthFailed.as_str())
        }) {
            next_actions.push("Check cloud credentials for the target cluster".to_string());
        }
        next_actions.push(
            "Fix the failing step and re-run; published images are not rolled back".to_string(),
        );
    }

    RunSummary {
        total_stages: results.len(),
        succeeded,
        failed,
        skipped,
        next_actions,
    }
}
