use dominion::context::RunContext;
use dominion::defaults::Defaults;
use dominion::environment::Environment;
use dominion::executor::{Executor, PipelineRunResult, RunStatus, StageStatus, StepStatus};
use dominion::notify::RecordingNotifier;
use dominion::pipeline::{self, Pipeline};
use dominion::shell::ShellRunner;
use dominion::tag;
use dominion::trigger::{self, Trigger};
use std::path::Path;

const PIPELINE: &str = r#"
name: service
on:
  manual: true
  push:
    branches: [main, "release/*"]
notify:
  on: [always]
stages:
  - id: build
    timeout_minutes: 5
    steps:
      - name: Resolve tag
        uses: image-tag
        id: tag
      - name: Record tag
        run: echo {{steps.tag.image_tag}} > tag.txt
      - name: Cleanup
        run: exit 3
        if: always
        continue_on_error: true
  - id: deploy
    needs: [build]
    steps:
      - name: Authenticate
        uses: cluster-auth
        with:
          command: "{{auth}}"
          cluster: "{{cluster}}"
      - name: Check overlay
        uses: require-dir
        with:
          path: "{{overlay_dir}}"
      - name: Apply monitoring add-on
        run: touch addon-applied
      - name: Set image
        run: echo {{needs.build.image}} > image.txt
      - name: Apply overlay
        run: touch applied
"#;

fn write_pipeline(dir: &Path, auth_command: &str) -> Pipeline {
    let path = dir.join("dominion.yml");
    std::fs::write(&path, PIPELINE.replace("{{auth}}", auth_command)).unwrap();
    pipeline::load(&path).unwrap()
}

fn manual(environment: &str, version: Option<&str>) -> Trigger {
    Trigger::Manual {
        environment: Some(environment.to_string()),
        image_version: version.map(String::from),
    }
}

fn run_in(dir: &Path, pipeline: &Pipeline, trigger: Trigger) -> (PipelineRunResult, RecordingNotifier) {
    let defaults = Defaults::default();
    let inputs = trigger::resolve_inputs(
        &trigger,
        &pipeline.on,
        defaults.default_environment,
        chrono::Utc::now(),
    )
    .unwrap()
    .expect("trigger should match");
    let ctx = RunContext::new(&pipeline.name, inputs, &defaults);
    let notifier = RecordingNotifier::new();
    let result = Executor::new(&ShellRunner, &notifier)
        .workdir(dir)
        .run(pipeline, ctx)
        .unwrap();
    (result, notifier)
}

#[test]
fn full_run_deploys_the_published_image() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("k8s/overlays/qa")).unwrap();
    let pipeline = write_pipeline(dir.path(), "true");

    let (result, notifier) = run_in(dir.path(), &pipeline, manual("qa", Some("v7")));

    assert_eq!(result.status, RunStatus::Success);
    assert!(dir.path().join("applied").exists());
    let image = std::fs::read_to_string(dir.path().join("image.txt")).unwrap();
    assert_eq!(image.trim(), "registry.dominion.internal/dominion/app:v7");

    let build = result.stage("build").unwrap();
    assert_eq!(build.steps[2].status, StepStatus::Suppressed);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].succeeded);
    assert_eq!(sent[0].environment, "qa");
}

#[test]
fn missing_overlay_aborts_before_apply() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(dir.path(), "true");

    let (result, notifier) = run_in(dir.path(), &pipeline, manual("prod", Some("v1")));

    assert_eq!(result.status, RunStatus::Failed);
    let deploy = result.stage("deploy").unwrap();
    assert_eq!(deploy.status, StageStatus::Failed);
    assert_eq!(deploy.error.as_ref().unwrap().code, "deploy.overlay_missing");
    assert!(!dir.path().join("addon-applied").exists());
    assert!(!dir.path().join("applied").exists());
    assert!(!result.summary.next_actions.is_empty());
    assert!(!notifier.sent()[0].succeeded);
}

#[test]
fn failed_authentication_aborts_before_add_ons() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("k8s/overlays/uat")).unwrap();
    let pipeline = write_pipeline(dir.path(), "echo 'no credentials' >&2; exit 1");

    let (result, _) = run_in(dir.path(), &pipeline, manual("uat", Some("v1")));

    let deploy = result.stage("deploy").unwrap();
    let error = deploy.error.as_ref().unwrap();
    assert_eq!(error.code, "deploy.cluster_auth_failed");
    assert!(error.message.contains("uat-dominion-cluster"));
    assert!(!dir.path().join("addon-applied").exists());
}

#[test]
fn missing_version_generates_timestamp_tag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("k8s/overlays/dev")).unwrap();
    let pipeline = write_pipeline(dir.path(), "true");

    let trigger = Trigger::Manual {
        environment: None,
        image_version: None,
    };
    let (result, _) = run_in(dir.path(), &pipeline, trigger);

    assert_eq!(result.inputs.environment, Environment::Dev);
    let recorded = std::fs::read_to_string(dir.path().join("tag.txt")).unwrap();
    assert!(tag::is_timestamp_tag(recorded.trim()));
    assert_eq!(recorded.trim(), result.inputs.image_tag.value);
}

#[test]
fn invalid_environment_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(dir.path(), "true");

    let err = trigger::resolve_inputs(
        &manual("staging", None),
        &pipeline.on,
        Environment::Dev,
        chrono::Utc::now(),
    )
    .unwrap_err();
    assert_eq!(err.code.as_str(), "validation.invalid_argument");
    assert!(!dir.path().join("tag.txt").exists());
}

#[test]
fn push_events_respect_branch_filters() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(dir.path(), "true");
    let now = chrono::Utc::now();

    let feature = Trigger::event("push", "feature/login").unwrap();
    assert!(trigger::resolve_inputs(&feature, &pipeline.on, Environment::Dev, now)
        .unwrap()
        .is_none());

    let release = Trigger::event("push", "release/2.1").unwrap();
    let inputs = trigger::resolve_inputs(&release, &pipeline.on, Environment::Dev, now)
        .unwrap()
        .unwrap();
    assert_eq!(inputs.branch.as_deref(), Some("release/2.1"));

    let pr = Trigger::event("pull_request", "main").unwrap();
    assert!(trigger::resolve_inputs(&pr, &pipeline.on, Environment::Dev, now)
        .unwrap()
        .is_none());
}

#[test]
fn secret_values_are_redacted_from_captured_output() {
    std::env::set_var("DOMINION_IT_REDACTED_TOKEN", "s3cr3t-token-value");
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline::from_yaml(
        r#"
name: redaction
secrets: [DOMINION_IT_REDACTED_TOKEN]
stages:
  - id: only
    steps:
      - name: Leak
        run: echo "token=$DOMINION_IT_REDACTED_TOKEN"
"#,
    )
    .unwrap();

    let (result, _) = run_in(dir.path(), &pipeline, manual("dev", Some("v1")));

    let stdout = &result.stages[0].steps[0].stdout;
    assert_eq!(stdout.trim(), "token=***");
}

#[test]
fn huge_stage_timeout_from_file_runs_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dominion.yml");
    std::fs::write(
        &path,
        r#"
name: patient
stages:
  - id: build
    timeout_minutes: 18446744073709551615
    steps:
      - name: Compile
        run: touch built
"#,
    )
    .unwrap();
    let pipeline = pipeline::load(&path).unwrap();

    let (result, _) = run_in(dir.path(), &pipeline, manual("dev", Some("v1")));

    assert_eq!(result.status, RunStatus::Success);
    assert!(dir.path().join("built").exists());
}
