use std::path::PathBuf;

use fixity_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server rejected the auth token (401)")]
    Auth,

    #[error("Server unavailable after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("Server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid batch: {0}")]
    Validation(#[from] ModelError),

    #[error("Lock {} is held{}", path.display(), holder(*pid))]
    Lock { path: PathBuf, pid: Option<u32> },

    #[error("State file {}: {message}", path.display())]
    State { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn holder(pid: Option<u32>) -> String {
    pid.map(|pid| format!(" by pid {pid}")).unwrap_or_default()
}

impl AgentError {
    /// Process exit code for an error that aborted a command before or
    /// instead of uploading. Upload failures inside a run exit with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            AgentError::Validation(_) | AgentError::Io(_) => 1,
            _ => 2,
        }
    }

    /// True for failures a later attempt might not hit.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_message_names_the_holder() {
        let err = AgentError::Lock {
            path: PathBuf::from("/tmp/state.json.lock"),
            pid: Some(42),
        };
        assert_eq!(err.to_string(), "Lock /tmp/state.json.lock is held by pid 42");
        assert_eq!(err.exit_code(), 2);

        let anonymous = AgentError::Lock {
            path: PathBuf::from("x.lock"),
            pid: None,
        };
        assert_eq!(anonymous.to_string(), "Lock x.lock is held");
    }

    #[test]
    fn exit_codes_follow_failure_class() {
        assert_eq!(AgentError::Config("x".into()).exit_code(), 2);
        assert_eq!(AgentError::Auth.exit_code(), 2);
        assert_eq!(AgentError::Validation(ModelError::EmptyBatch).exit_code(), 1);
    }
}
