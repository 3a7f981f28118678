use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No backup timestamp found in name: {0}")]
    NoTimestamp(String),

    #[error("{tool} failed with status {status}: {stderr}")]
    ToolInvocation {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Builds a `ToolInvocation` error from a finished process.
    pub fn tool(tool: &str, output: &std::process::Output) -> Self {
        AppError::ToolInvocation {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
