//! Library-level error surfaced by every prepared operation.
//!
//! # Responsibility
//! - Classify failures as configuration, resolution, execution or cancellation.
//! - Preserve the original resolver/backend failure as `source()`.
//!
//! # Invariants
//! - Resolvers and backends never produce `StoreError`; wrapping happens once,
//!   at the execution boundary.
//! - `NoTypeMapping` is only raised before any backend call.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Boxed failure raised by resolvers and backends.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Caller assembled an operation or store incorrectly.
    Configuration(String),
    /// No explicit resolver and no registered type mapping for the target type.
    NoTypeMapping { type_name: &'static str },
    /// A resolver or the backend failed while the operation was running.
    Execution {
        operation: &'static str,
        cause: BoxError,
    },
    /// The pending operation was cancelled before it delivered a result.
    Cancelled,
}

impl StoreError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn no_type_mapping<T: ?Sized>() -> Self {
        Self::NoTypeMapping {
            type_name: std::any::type_name::<T>(),
        }
    }

    pub(crate) fn execution(operation: &'static str, cause: impl Into<BoxError>) -> Self {
        Self::Execution {
            operation,
            cause: cause.into(),
        }
    }

    /// Original failure for `Execution` errors.
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Execution { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::NoTypeMapping { .. } => "no_type_mapping",
            Self::Execution { .. } => "execution_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "{message}"),
            Self::NoTypeMapping { type_name } => write!(
                f,
                "no type mapping registered for `{type_name}`; storage was not affected, \
                 register a mapping or pass a resolver explicitly"
            ),
            Self::Execution { operation, cause } => {
                write!(f, "error during {operation} operation: {cause}")
            }
            Self::Cancelled => write!(f, "operation was cancelled"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Execution { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;
    use std::error::Error;

    #[test]
    fn execution_error_exposes_cause() {
        let err = StoreError::execution("delete", "test exception");
        assert_eq!(err.cause().unwrap().to_string(), "test exception");
        assert_eq!(err.source().unwrap().to_string(), "test exception");
        assert!(err.to_string().contains("delete"));
        assert_eq!(err.code(), "execution_failed");
    }

    #[test]
    fn no_type_mapping_names_the_type() {
        let err = StoreError::no_type_mapping::<String>();
        assert!(err.to_string().contains("alloc::string::String"));
        assert!(err.source().is_none());
    }
}
