use std::fmt;

use crate::error::ExecError;
use crate::executor::CommandExecutor;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidTask {
    #[error("task has no program to run")]
    EmptyProgram,
}

/// One external command plus its log annotations. Immutable once built.
///
/// Two tasks are equal when their rendered command lines are equal, which
/// is what [`TaskRunner::add_unique`](crate::TaskRunner::add_unique) dedups on.
#[derive(Debug, Clone)]
pub struct Task {
    program: String,
    args: Vec<String>,
    verbose: bool,
    pre_info: Option<String>,
    post_info: Option<String>,
}

impl Task {
    pub fn builder(program: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            program: program.into(),
            args: Vec::new(),
            verbose: false,
            pre_info: None,
            post_info: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn pre_info(&self) -> Option<&str> {
        self.pre_info.as_deref()
    }

    pub fn post_info(&self) -> Option<&str> {
        self.post_info.as_deref()
    }

    /// Run the command. Verbose tasks stream their output.
    pub async fn execute<E: CommandExecutor>(&self, executor: &E) -> Result<(), ExecError> {
        if let Some(info) = &self.pre_info {
            tracing::info!("{info}");
        }
        tracing::debug!(cmd = %self, "running");

        if self.verbose {
            executor.exec_streaming(&self.program, &self.args).await?;
        } else {
            let output = executor.exec(&self.program, &self.args).await?;
            tracing::trace!(cmd = %self, output = %output.trim_end(), "finished");
        }

        if let Some(info) = &self.post_info {
            tracing::info!("{info}");
        }
        Ok(())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&command_line(&self.program, &self.args))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.program == other.program && self.args == other.args
    }
}

impl Eq for Task {}

pub struct TaskBuilder {
    program: String,
    args: Vec<String>,
    verbose: bool,
    pre_info: Option<String>,
    post_info: Option<String>,
}

impl TaskBuilder {
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Logged at `info` before the command starts.
    pub fn pre_info(mut self, message: impl Into<String>) -> Self {
        self.pre_info = Some(message.into());
        self
    }

    /// Logged at `info` after the command succeeds.
    pub fn post_info(mut self, message: impl Into<String>) -> Self {
        self.post_info = Some(message.into());
        self
    }

    pub fn build(self) -> Result<Task, InvalidTask> {
        if self.program.trim().is_empty() {
            return Err(InvalidTask::EmptyProgram);
        }
        Ok(Task {
            program: self.program,
            args: self.args,
            verbose: self.verbose,
            pre_info: self.pre_info,
            post_info: self.post_info,
        })
    }
}

/// Shell-like rendering of a command, quoting arguments that need it.
pub fn command_line(program: &str, args: &[String]) -> String {
    shell_words::join(std::iter::once(program).chain(args.iter().map(String::as_str)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_when_needed() {
        let task = Task::builder("docker")
            .args(["build", "--label", "maintainer=Jane <j@x.io>", "."])
            .build()
            .unwrap();
        assert_eq!(
            task.to_string(),
            "docker build --label 'maintainer=Jane <j@x.io>' ."
        );
    }

    #[test]
    fn equality_ignores_annotations() {
        let a = Task::builder("docker")
            .args(["tag", "a", "b"])
            .pre_info("Tagging b")
            .build()
            .unwrap();
        let b = Task::builder("docker")
            .args(["tag", "a", "b"])
            .verbose(true)
            .build()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_program_is_rejected() {
        assert_eq!(
            Task::builder("  ").build().unwrap_err(),
            InvalidTask::EmptyProgram
        );
    }

    #[test]
    fn display_round_trips_through_shell_splitting() {
        let args = vec![
            "run".to_owned(),
            "--change".to_owned(),
            r#"ENV GREETING="hi there""#.to_owned(),
            "it's $HOME".to_owned(),
        ];
        let line = command_line("docker", &args);
        let mut words = shell_words::split(&line).unwrap();
        assert_eq!(words.remove(0), "docker");
        assert_eq!(words, args);
    }

    #[test]
    fn empty_and_quoted_args() {
        assert_eq!(
            command_line("echo", &["".to_owned(), "it's".to_owned()]),
            r"echo '' 'it'\''s'"
        );
    }
}
