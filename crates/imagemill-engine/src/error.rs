use std::time::Duration;

use crate::builder::Stage;
use crate::task::InvalidTask;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start '{program}' - is it installed and on PATH?")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("command failed ({status}): {command}\n{output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("command output was not valid UTF-8: {command}")]
    InvalidUtf8 {
        command: String,
        source: std::string::FromUtf8Error,
    },

    #[error("command timed out after {}s: {command}", after.as_secs_f64())]
    TimedOut { command: String, after: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{stage} stage failed")]
    Stage { stage: Stage, source: ExecError },

    #[error("failed to inspect image {image}")]
    Inspect { image: String, source: ExecError },

    #[error("unexpected inspect output for image {image}")]
    InspectParse {
        image: String,
        source: serde_json::Error,
    },

    #[error("inspect returned no metadata for image {image}")]
    InspectEmpty { image: String },

    #[error(transparent)]
    InvalidTask {
        #[from]
        source: InvalidTask,
    },
}
