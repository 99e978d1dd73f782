//! Error types for render dispatch and the artifact cache.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`RenderError::code()`].

use crate::types::ArtifactKind;

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// The artifact store could not be opened or queried.
    pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";

    /// Transport error or non-2xx response from the remote server.
    pub const NETWORK_FAILURE: &str = "NETWORK_FAILURE";

    /// The selected backend cannot produce the requested output kind.
    pub const UNSUPPORTED_OUTPUT_KIND: &str = "UNSUPPORTED_OUTPUT_KIND";

    /// The local renderer process could not be started.
    pub const SPAWN_FAILED: &str = "SPAWN_FAILED";

    /// The local renderer process ran but did not produce an artifact.
    pub const RENDER_PROCESS_FAILED: &str = "RENDER_PROCESS_FAILED";

    /// The in-process engine never finished initializing.
    pub const ENGINE_NOT_INITIALIZED: &str = "ENGINE_NOT_INITIALIZED";

    /// The in-process engine module failed to load.
    pub const ENGINE_UNAVAILABLE: &str = "ENGINE_UNAVAILABLE";

    /// Settings are missing, contradictory, or unreadable.
    pub const INVALID_CONFIGURATION: &str = "INVALID_CONFIGURATION";
}

/// Errors produced while rendering or caching diagrams.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The artifact store could not be opened or queried.
    #[error("[{}] {}", error_codes::STORAGE_UNAVAILABLE, .0)]
    StorageUnavailable(String),

    /// Transport error or non-2xx response from the remote server.
    #[error("[{}] {}", error_codes::NETWORK_FAILURE, .0)]
    NetworkFailure(String),

    /// The selected backend cannot produce `kind`.
    #[error("[{}] {backend} cannot render {kind}: {message}", error_codes::UNSUPPORTED_OUTPUT_KIND)]
    UnsupportedOutputKind {
        /// Name of the backend that refused the request.
        backend: &'static str,
        /// The requested artifact kind.
        kind: ArtifactKind,
        /// Detail for logs.
        message: String,
    },

    /// The local renderer process could not be started.
    #[error("[{}] failed to spawn {program}: {source}", error_codes::SPAWN_FAILED)]
    SpawnFailed {
        /// The program that was invoked.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The local renderer process exited without producing an artifact.
    #[error("[{}] renderer exited with code {exit_code:?}: {stderr}", error_codes::RENDER_PROCESS_FAILED)]
    RenderProcessFailed {
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The in-process engine never finished initializing.
    #[error("[{}] {}", error_codes::ENGINE_NOT_INITIALIZED, .0)]
    EngineNotInitialized(String),

    /// The in-process engine module failed to load.
    #[error("[{}] {}", error_codes::ENGINE_UNAVAILABLE, .0)]
    EngineUnavailable(String),

    /// Settings are missing, contradictory, or unreadable.
    #[error("[{}] {}", error_codes::INVALID_CONFIGURATION, .0)]
    InvalidConfiguration(String),
}

impl RenderError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageUnavailable(_) => error_codes::STORAGE_UNAVAILABLE,
            Self::NetworkFailure(_) => error_codes::NETWORK_FAILURE,
            Self::UnsupportedOutputKind { .. } => error_codes::UNSUPPORTED_OUTPUT_KIND,
            Self::SpawnFailed { .. } => error_codes::SPAWN_FAILED,
            Self::RenderProcessFailed { .. } => error_codes::RENDER_PROCESS_FAILED,
            Self::EngineNotInitialized(_) => error_codes::ENGINE_NOT_INITIALIZED,
            Self::EngineUnavailable(_) => error_codes::ENGINE_UNAVAILABLE,
            Self::InvalidConfiguration(_) => error_codes::INVALID_CONFIGURATION,
        }
    }

    /// Returns true if the failure is transient and a caller-side retry may help.
    ///
    /// Only network failures qualify. Process, engine and configuration errors
    /// repeat deterministically for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// Human-readable message suitable for showing in place of a diagram.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedOutputKind {
                backend: "server",
                kind: ArtifactKind::AsciiArt,
                ..
            } => "Your configured PlantUML server does not support ASCII art".to_owned(),
            Self::UnsupportedOutputKind { backend, kind, .. } => {
                format!("The {backend} renderer does not support {kind} output")
            }
            Self::NetworkFailure(m) => format!("Could not reach the PlantUML server: {m}"),
            Self::SpawnFailed { program, .. } => {
                format!("Could not start the local renderer ({program})")
            }
            Self::RenderProcessFailed { stderr, .. } if !stderr.trim().is_empty() => {
                format!("PlantUML failed to render the diagram:\n{}", stderr.trim())
            }
            Self::RenderProcessFailed { exit_code, .. } => {
                format!("PlantUML failed to render the diagram (exit code {exit_code:?})")
            }
            Self::EngineNotInitialized(_) => "The PlantUML engine is still starting".to_owned(),
            Self::EngineUnavailable(m) => format!("The PlantUML engine could not be loaded: {m}"),
            Self::StorageUnavailable(m) => format!("The diagram cache is unavailable: {m}"),
            Self::InvalidConfiguration(m) => format!("Invalid PlantUML settings: {m}"),
        }
    }
}

impl From<rusqlite::Error> for RenderError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn display_includes_code() {
        let err = RenderError::NetworkFailure("connection refused".into());
        assert_eq!(err.to_string(), "[NETWORK_FAILURE] connection refused");
        assert_eq!(err.code(), error_codes::NETWORK_FAILURE);
    }

    #[test]
    fn spawn_failed_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "java not found");
        let err = RenderError::SpawnFailed {
            program: "java".into(),
            source: io_err,
        };
        assert!(err.to_string().contains("failed to spawn java"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.code(), "SPAWN_FAILED");
    }

    #[test]
    fn only_network_failures_are_retryable() {
        assert!(RenderError::NetworkFailure("x".into()).is_retryable());
        assert!(!RenderError::StorageUnavailable("x".into()).is_retryable());
        assert!(
            !RenderError::RenderProcessFailed {
                exit_code: Some(1),
                stderr: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn server_ascii_unsupported_has_dedicated_message() {
        let err = RenderError::UnsupportedOutputKind {
            backend: "server",
            kind: ArtifactKind::AsciiArt,
            message: "PNG returned for /txt/".into(),
        };
        assert_eq!(
            err.user_message(),
            "Your configured PlantUML server does not support ASCII art"
        );

        let engine = RenderError::UnsupportedOutputKind {
            backend: "engine",
            kind: ArtifactKind::Vector,
            message: String::new(),
        };
        assert!(engine.user_message().contains("engine"));
        assert_ne!(engine.user_message(), err.user_message());
    }

    #[test]
    fn process_failure_message_prefers_stderr() {
        let err = RenderError::RenderProcessFailed {
            exit_code: Some(1),
            stderr: "Syntax Error?\n".into(),
        };
        assert!(err.user_message().ends_with("Syntax Error?"));
    }

    #[test]
    fn sqlite_errors_map_to_storage_unavailable() {
        let err: RenderError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.code(), error_codes::STORAGE_UNAVAILABLE);
    }
}
