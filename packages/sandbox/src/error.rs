use thiserror::Error;

/// Failures of the sandbox itself, as opposed to faults of the program it runs.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Environment initialization failed: {0}")]
    Initialization(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid entry point name '{0}'")]
    InvalidEntry(String),

    #[error("Sandbox is shutting down")]
    Unavailable,
}
