//! Shell command execution for pipeline steps.
//!
//! Every step command runs through `sh -c` (`cmd /C` on Windows). A step may
//! carry a deadline from its stage timeout. Only those commands are spawned
//! into their own process group; when the deadline passes, the whole group is
//! killed and the output is marked `timed_out`. Commands without a deadline
//! stay in the caller's group so terminal signals reach them.

use command_group::{CommandGroup, GroupChild};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl CommandOutput {
    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }

    fn spawn_failed(error: std::io::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Command error: {}", error),
            success: false,
            exit_code: -1,
            timed_out: false,
        }
    }
}

/// One command invocation.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec<'a> {
    pub command: &'a str,
    pub dir: Option<&'a Path>,
    pub env: &'a [(String, String)],
    pub deadline: Option<Instant>,
}

impl<'a> CommandSpec<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            dir: None,
            env: &[],
            deadline: None,
        }
    }
}

/// Runs step commands. The executor only talks to this seam.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec<'_>) -> CommandOutput;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &CommandSpec<'_>) -> CommandOutput {
        let mut cmd = shell_command(spec.command);

        if let Some(dir) = spec.dir {
            cmd.current_dir(dir);
        }
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        match spec.deadline {
            None => match cmd.output() {
                Ok(out) => CommandOutput {
                    stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                    success: out.status.success(),
                    exit_code: out.status.code().unwrap_or(-1),
                    timed_out: false,
                },
                Err(e) => CommandOutput::spawn_failed(e),
            },
            Some(deadline) => run_with_deadline(cmd, deadline),
        }
    }
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn run_with_deadline(mut cmd: Command, deadline: Instant) -> CommandOutput {
    if Instant::now() >= deadline {
        return CommandOutput {
            stderr: "Stage deadline passed before command started".to_string(),
            exit_code: -1,
            timed_out: true,
            ..CommandOutput::default()
        };
    }

    // Group spawn so a timeout takes down grandchildren too.
    let mut child: GroupChild = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .group_spawn()
    {
        Ok(child) => child,
        Err(e) => return CommandOutput::spawn_failed(e),
    };

    let stdout_reader = drain(child.inner().stdout.take());
    let stderr_reader = drain(child.inner().stderr.take());

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => {
                timed_out = true;
                // The group may already be gone; wait() still reaps the leader.
                let _ = child.kill();
                break child.wait().ok();
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(_) => break None,
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let mut stderr = stderr_reader.join().unwrap_or_default();
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str("Command killed: stage timeout reached");
    }

    let success = !timed_out && status.is_some_and(|s| s.success());
    let exit_code = if timed_out {
        -1
    } else {
        status.and_then(|s| s.code()).unwrap_or(-1)
    };

    CommandOutput {
        stdout,
        stderr,
        success,
        exit_code,
        timed_out,
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Replace every secret value in `text` with `***`.
///
/// Values shorter than four characters are left alone; masking them would
/// shred ordinary output.
pub fn redact(text: &str, secret_values: &[String]) -> String {
    let mut result = text.to_string();
    for value in secret_values {
        if value.len() >= 4 {
            result = result.replace(value.as_str(), "***");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_command_and_captures_output() {
        let output = ShellRunner.run(&CommandSpec::new("echo hello"));
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn reports_exit_code_and_stderr() {
        let output = ShellRunner.run(&CommandSpec::new("echo oops >&2; exit 3"));
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.error_text(), "oops");
    }

    #[test]
    fn passes_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let env = vec![("DOMINION_TEST_VALUE".to_string(), "42".to_string())];
        let spec = CommandSpec {
            command: "echo $DOMINION_TEST_VALUE; pwd",
            dir: Some(dir.path()),
            env: &env,
            deadline: None,
        };
        let output = ShellRunner.run(&spec);
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert_eq!(lines[0], "42");
        assert!(lines[1].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn deadline_kills_long_command() {
        let started = Instant::now();
        let spec = CommandSpec {
            deadline: Some(Instant::now() + Duration::from_millis(300)),
            ..CommandSpec::new("sleep 5; echo late")
        };
        let output = ShellRunner.run(&spec);
        assert!(output.timed_out);
        assert!(!output.success);
        assert!(!output.stdout.contains("late"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_background_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let command = format!("(sleep 1; touch '{}') & wait", marker.display());
        let spec = CommandSpec {
            deadline: Some(Instant::now() + Duration::from_millis(200)),
            ..CommandSpec::new(&command)
        };

        let started = Instant::now();
        let output = ShellRunner.run(&spec);
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_millis(900));

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }

    /// Field 5 of `/proc/<pid>/stat` is the process group id.
    #[cfg(target_os = "linux")]
    const SHELL_PID_AND_PGID: &str = "echo \"$$ $(cut -d' ' -f5 /proc/$$/stat)\"";

    #[cfg(target_os = "linux")]
    #[test]
    fn commands_without_deadline_share_the_caller_process_group() {
        let output = ShellRunner.run(&CommandSpec::new(SHELL_PID_AND_PGID));
        assert!(output.success);
        let shell_pgid = output.stdout.split_whitespace().nth(1).unwrap();

        let stat = std::fs::read_to_string("/proc/self/stat").unwrap();
        let own_pgid = stat.rsplit(')').next().unwrap().split_whitespace().nth(2).unwrap();
        assert_eq!(shell_pgid, own_pgid);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn commands_with_deadline_run_in_their_own_process_group() {
        let spec = CommandSpec {
            deadline: Some(Instant::now() + Duration::from_secs(10)),
            ..CommandSpec::new(SHELL_PID_AND_PGID)
        };
        let output = ShellRunner.run(&spec);
        let fields: Vec<&str> = output.stdout.split_whitespace().collect();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], fields[1]);
    }

    #[test]
    fn deadline_not_reached_behaves_normally() {
        let spec = CommandSpec {
            deadline: Some(Instant::now() + Duration::from_secs(10)),
            ..CommandSpec::new("echo quick")
        };
        let output = ShellRunner.run(&spec);
        assert!(output.success);
        assert!(!output.timed_out);
        assert_eq!(output.stdout.trim(), "quick");
    }

    #[test]
    fn expired_deadline_does_not_start_command() {
        let spec = CommandSpec {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..CommandSpec::new("echo never")
        };
        let output = ShellRunner.run(&spec);
        assert!(output.timed_out);
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn redact_masks_long_values_only() {
        let secrets = vec!["s3cr3t-token".to_string(), "ab".to_string()];
        assert_eq!(
            redact("token=s3cr3t-token ab", &secrets),
            "token=*** ab"
        );
    }
}
