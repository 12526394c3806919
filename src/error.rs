use thiserror::Error;

/// Main error type for streamsig
#[derive(Error, Debug)]
pub enum SigError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Rule name already in use: {0}")]
    DuplicateNameError(String),

    #[error("Duplicate pattern in rule: {0}")]
    DuplicatePatternError(String),

    #[error("Failed to compile pattern {pattern}: {reason}")]
    CompileError { pattern: String, reason: String },

    #[error("Pattern rejected by engine: {0}")]
    EngineValidationError(String),

    #[error("Failed to build matching engine: {0}")]
    EngineBuildError(String),

    #[error("Rule store error: {0}")]
    PersistenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel send error")]
    ChannelSendError,

    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl SigError {
    /// Whether the error was caused by the submitted rule itself rather than
    /// by the engine or the store
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SigError::ValidationError(_)
                | SigError::DuplicateNameError(_)
                | SigError::DuplicatePatternError(_)
                | SigError::CompileError { .. }
                | SigError::EngineValidationError(_)
        )
    }
}

/// Result type alias for streamsig operations
pub type Result<T> = std::result::Result<T, SigError>;

impl<T> From<crossbeam::channel::SendError<T>> for SigError {
    fn from(_: crossbeam::channel::SendError<T>) -> Self {
        SigError::ChannelSendError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(SigError::DuplicateNameError("flag".to_string()).is_rejection());
        assert!(SigError::CompileError {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string()
        }
        .is_rejection());
        assert!(!SigError::EngineBuildError("too large".to_string()).is_rejection());
        assert!(!SigError::PersistenceError("unreachable".to_string()).is_rejection());
    }

    #[test]
    fn test_send_error_conversion() {
        let (tx, rx) = crossbeam::channel::bounded::<u8>(1);
        drop(rx);
        let err: SigError = tx.send(1).unwrap_err().into();
        assert!(matches!(err, SigError::ChannelSendError));
    }
}
