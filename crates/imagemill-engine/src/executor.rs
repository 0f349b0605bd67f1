use std::process::Stdio;

use crate::error::ExecError;
use crate::task::command_line;

/// Abstraction over external command execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks
/// or hand-written recorders.
#[allow(async_fn_in_trait)]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and capture its combined stdout/stderr.
    async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError>;

    /// Execute a command, streaming output to the terminal.
    async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ExecError>;
}

/// Runs commands as child processes.
///
/// Children are killed when their future is dropped, which is how a
/// per-task deadline stops a hung command.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealExecutor;

impl CommandExecutor for RealExecutor {
    async fn exec(&self, program: &str, args: &[String]) -> Result<String, ExecError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::NotFound {
                program: program.to_owned(),
                source: e,
            })?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| ExecError::InvalidUtf8 {
                command: command_line(program, args),
                source: e,
            })
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(ExecError::CommandFailed {
                command: command_line(program, args),
                status: output.status.to_string(),
                output: combined.trim_end().to_owned(),
            })
        }
    }

    async fn exec_streaming(&self, program: &str, args: &[String]) -> Result<(), ExecError> {
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ExecError::NotFound {
                program: program.to_owned(),
                source: e,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::CommandFailed {
                command: command_line(program, args),
                status: status.to_string(),
                output: String::new(),
            })
        }
    }
}
