//! Error types for the declarative engine.
//!
//! Build and resolve errors are fatal for the whole run: no partial plan is
//! meaningful when the graph is invalid. Provider errors are different, they
//! belong to a single instance and are carried in the apply report instead
//! of aborting the run.

use thiserror::Error;

/// Errors raised while building, resolving, planning or persisting state.
#[derive(Debug, Error)]
pub enum Error {
    /// Two declarations (or two expanded instances) share an identity
    #[error("duplicate resource identity: {address}")]
    DuplicateIdentity {
        /// The colliding address
        address: String,
    },

    /// An attribute or `depends_on` entry points at an unknown instance
    #[error("{from}: reference to undeclared resource {target}")]
    UnresolvedReference {
        /// Address of the referring instance
        from: String,
        /// The reference as written
        target: String,
    },

    /// The resource graph contains a cycle
    #[error("dependency cycle: {}", .path.join(" -> "))]
    CyclicDependency {
        /// The full cycle, first element repeated at the end
        path: Vec<String>,
    },

    /// A `${var.NAME}` or `{ var = ... }` names an unknown variable
    #[error("{context}: unknown variable '{name}'")]
    UnknownVariable {
        /// Where the variable was used
        context: String,
        /// Variable name
        name: String,
    },

    /// A declaration is structurally invalid
    #[error("{context}: {message}")]
    InvalidDeclaration {
        /// Where the problem was found
        context: String,
        /// What is wrong
        message: String,
    },

    /// A string could not be parsed as an instance address
    #[error("invalid address '{input}': {message}")]
    InvalidAddress {
        /// The offending input
        input: String,
        /// What is wrong
        message: String,
    },

    /// State contents cannot be interpreted against the declarations
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// A saved plan was computed against a different state
    #[error("plan is stale: state changed since the plan was created (plan {expected}, state {actual})")]
    StalePlan {
        /// Fingerprint recorded in the plan
        expected: String,
        /// Fingerprint of the current state
        actual: String,
    },

    /// A plan's prerequisite indices are inconsistent
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The apply worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    /// State store I/O error
    #[error("state store error: {0}")]
    Store(#[from] std::io::Error),

    /// State or plan (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error comes from validating the declarations themselves.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIdentity { .. }
                | Self::UnresolvedReference { .. }
                | Self::CyclicDependency { .. }
                | Self::UnknownVariable { .. }
                | Self::InvalidDeclaration { .. }
                | Self::InvalidAddress { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of provider errors, used by the retry decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Throttling, timeouts, connectivity (retryable)
    Transient,
    /// The provider-side object does not exist
    NotFound,
    /// The request conflicts with provider-side state
    Conflict,
    /// Credentials lack permission
    Permission,
    /// The provider rejected the attributes
    Invalid,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether this category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Transient provider error",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Conflicting provider state",
            Self::Permission => "Permission denied",
            Self::Invalid => "Invalid attributes",
            Self::Other => "Unexpected error",
        }
    }
}

/// An error reported by a [`Provider`](crate::Provider) for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct ProviderError {
    /// Category, drives retry decisions
    pub category: ErrorCategory,
    /// Provider message
    pub message: String,
}

impl ProviderError {
    /// Create an error with an explicit category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Shorthand for a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    /// Shorthand for a non-retryable error of unknown category.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Other, message)
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_full_path() {
        let err = Error::CyclicDependency {
            path: vec!["a.x".into(), "b.y".into(), "a.x".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a.x -> b.y -> a.x");
        assert!(err.is_validation());
    }

    #[test]
    fn test_state_errors_are_not_validation() {
        assert!(!Error::StateCorruption("bad".into()).is_validation());
    }

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(!ProviderError::other("boom").is_retryable());
        assert!(!ProviderError::new(ErrorCategory::Conflict, "in use").is_retryable());
    }
}
