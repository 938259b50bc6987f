//! Subprocess-backed script runner.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use tracing::{debug, info};

use super::{RunMode, RunOutput, RunRequest, ScriptRunner};

/// Runs a configured command with the script path appended.
///
/// The command reports back by printing a JSON [`RunOutput`] as the last
/// non-empty line of stdout. Run parameters reach it through `STAGEHAND_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    command: Vec<String>,
    test_command: Option<Vec<String>>,
    working_dir: Option<PathBuf>,
}

impl ProcessScriptRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            test_command: None,
            working_dir: None,
        }
    }

    /// Use a different command for [`RunMode::Test`] runs.
    pub fn with_test_command(mut self, command: Vec<String>) -> Self {
        self.test_command = Some(command);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command_for(&self, mode: RunMode) -> &[String] {
        match (mode, &self.test_command) {
            (RunMode::Test, Some(test)) => test,
            _ => &self.command,
        }
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn run(&self, request: &RunRequest) -> anyhow::Result<RunOutput> {
        let Some((program, args)) = self.command_for(request.mode).split_first() else {
            anyhow::bail!("No runner command configured; set [runner] command in stagehand.toml");
        };

        let mut cmd = Command::new(program);
        cmd.args(args).arg(&request.script);
        cmd.env("STAGEHAND_MODE", request.mode.as_str());
        if let Some(arguments) = &request.arguments {
            cmd.env("STAGEHAND_ARGUMENTS", arguments.to_string());
        }
        if let Some(rpc_url) = &request.rpc_url {
            cmd.env("STAGEHAND_RPC_URL", rpc_url.as_str());
        }
        if let Some(signer) = &request.signer {
            cmd.env("STAGEHAND_SIGNER", signer);
        }
        cmd.envs(&request.env);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(program = %program, script = %request.script.display(), mode = %request.mode, "running script");
        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn runner '{}'", program))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(status = ?output.status, stdout_len = stdout.len(), "runner exited");

        let mut report = match parse_report(&stdout) {
            Some(report) => report,
            None => RunOutput {
                success: false,
                error: Some(format!(
                    "runner produced no JSON report (exit status {})",
                    output.status
                )),
                ..RunOutput::default()
            },
        };
        if !output.status.success() {
            report.success = false;
            if report.error.is_none() {
                report.error = Some(format!("runner exited with {}", output.status));
            }
        }
        report.output = format!("{stdout}{stderr}");
        Ok(report)
    }
}

/// Parse the last non-empty stdout line as a report.
fn parse_report(stdout: &str) -> Option<RunOutput> {
    let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}
