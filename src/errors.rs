//! Error types for the rental pools

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by pool operations.
///
/// Rent failures are mutually exclusive and are classified in a fixed order:
/// [`Disposed`](PoolError::Disposed), [`Cancelled`](PoolError::Cancelled),
/// [`Timeout`](PoolError::Timeout) and finally [`Unavailable`](PoolError::Unavailable).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool '{pool}' has been disposed")]
    Disposed { pool: String },

    #[error("Rent from pool '{pool}' timed out after {timeout:?}")]
    Timeout { pool: String, timeout: Duration },

    #[error("Rent from pool '{pool}' was cancelled")]
    Cancelled { pool: String },

    #[error("No element is available in pool '{pool}'")]
    Unavailable { pool: String },

    #[error("Rented element of pool '{pool}' was already released")]
    ElementReleased { pool: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    /// Whether the error reports a rent that simply did not get an element in time
    /// (as opposed to a shutdown or a programming error).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PoolError::Timeout { .. } | PoolError::Cancelled { .. } | PoolError::Unavailable { .. }
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = PoolError::Timeout {
            pool: "connections".to_string(),
            timeout: Duration::from_millis(250),
        };
        let message = err.to_string();
        assert!(message.contains("connections"));
        assert!(message.contains("250ms"));
    }

    #[test]
    fn test_unavailable_classification() {
        let pool = "p".to_string();
        assert!(PoolError::Cancelled { pool: pool.clone() }.is_unavailable());
        assert!(PoolError::Unavailable { pool: pool.clone() }.is_unavailable());
        assert!(!PoolError::Disposed { pool }.is_unavailable());
        assert!(!PoolError::InvalidOperation("x".into()).is_unavailable());
    }
}
