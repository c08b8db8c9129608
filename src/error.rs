//! Error types for orchestration operations.

/// Coarse classification of a transport-level failure, inferred from the
/// failure text the shell transport reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The hop chain (or a command round trip) exceeded its deadline.
    Timeout,
    /// Connection refused, unreachable host, broken tunnel.
    Connection,
    /// Key or credential rejected by a hop.
    Authentication,
    /// Anything the classifier could not place.
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::Authentication => "authentication",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Error type for orchestration operations.
///
/// A non-zero exit code inside an otherwise successful batch is NOT an error;
/// it is data on the `CommandResult` and interpreted by the calling
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Lease error: {0}")]
    Lease(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Shorthand for a transport error built from classified failure text.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        OrchestrationError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transport_timeout(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }
}
