use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} does not exist: {reference}")]
    NotFound { kind: &'static str, reference: String },

    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{message}{}", log_hint(.log))]
    EngineFailure {
        message: String,
        log: Option<PathBuf>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("invalid {0}")]
    Invalid(String),

    #[error("campaign document is invalid: {0}")]
    Schema(String),

    #[error(
        "operation_in_progress: {} is held by {holder}; delete it if that process is gone",
        .path.display()
    )]
    Locked { path: PathBuf, holder: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn log_hint(log: &Option<PathBuf>) -> String {
    match log {
        Some(path) => format!(", for more information view the log file at {}", path.display()),
        None => String::new(),
    }
}

impl Error {
    pub fn not_found(kind: &'static str, reference: impl fmt::Display) -> Self {
        Error::NotFound {
            kind,
            reference: reference.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid(message.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::EngineFailure { .. } => "engine_failure",
            Error::Validation(_) => "validation_failure",
            Error::Invalid(_) => "invalid_argument",
            Error::Schema(_) => "schema_violation",
            Error::Locked { .. } => "operation_in_progress",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    ExitCode,
    Stdout,
    Stderr,
}

impl Criterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::ExitCode => "exit_code",
            Criterion::Stdout => "stdout",
            Criterion::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A behavioral mismatch between the original and the recovered binary.
///
/// In pattern mode `original` carries the pattern the lifted output was
/// checked against, since the original output is never consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub criterion: Criterion,
    pub original: String,
    pub lifted: String,
    pub by_pattern: bool,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.criterion, self.by_pattern) {
            (Criterion::ExitCode, _) => write!(
                f,
                "recovered exit code does not match original (original: {}, recovered: {})",
                self.original, self.lifted
            ),
            (stream, false) => write!(
                f,
                "recovered {} content does not match original",
                stream
            ),
            (stream, true) => write!(
                f,
                "regex pattern for {} content does not match: {}",
                stream, self.original
            ),
        }
    }
}

impl std::error::Error for ValidationFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_names_the_criterion() {
        let failure = ValidationFailure {
            criterion: Criterion::Stdout,
            original: "ok\n".to_string(),
            lifted: "OK\n".to_string(),
            by_pattern: false,
        };
        let err = Error::from(failure);
        assert_eq!(err.code(), "validation_failure");
        assert_eq!(
            err.to_string(),
            "recovered stdout content does not match original"
        );
    }

    #[test]
    fn engine_failure_points_at_log() {
        let err = Error::EngineFailure {
            message: "s2e run failed for project: cat".to_string(),
            log: Some(PathBuf::from("/p/cat/s2e-out-3.log")),
        };
        let msg = err.to_string();
        assert!(msg.contains("s2e-out-3.log"), "missing log path: {}", msg);
    }

    #[test]
    fn locked_names_the_holder() {
        let err = Error::Locked {
            path: PathBuf::from("/c/.cat.lock"),
            holder: "pid 42 since 2026-01-01T00:00:00+00:00".to_string(),
        };
        assert_eq!(err.code(), "operation_in_progress");
        let msg = err.to_string();
        assert!(msg.contains("/c/.cat.lock"), "{}", msg);
        assert!(msg.contains("pid 42"), "{}", msg);
    }
}
