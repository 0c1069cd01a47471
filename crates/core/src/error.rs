//! Domain error model.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Transport-agnostic error category.
///
/// The core never talks HTTP; the boundary translates a category into whatever
/// status its transport uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    Forbidden,
    InvalidInput,
    Conflict,
    /// Well-formed request that the current state cannot satisfy.
    Unprocessable,
    /// Infrastructure failure; the caller may retry.
    Unavailable,
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A part/location/stock item/order is missing in the tenant scope.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The caller's role is below the tier the operation requires.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed ids, non-positive quantities, equal transfer endpoints, ...
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Issue or transfer exceeds the on-hand quantity.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// An adjustment or stock count would drive a quantity below zero.
    #[error("negative result: {0}")]
    NegativeResult(String),

    /// A purchase-order (or alert) status change outside the allowed edges.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A concurrent writer got there first.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn negative_result(msg: impl Into<String>) -> Self {
        Self::NegativeResult(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DomainError::NotFound { .. } => ErrorCategory::NotFound,
            DomainError::Forbidden(_) => ErrorCategory::Forbidden,
            DomainError::InvalidInput(_) => ErrorCategory::InvalidInput,
            DomainError::InsufficientStock { .. }
            | DomainError::NegativeResult(_)
            | DomainError::InvalidTransition { .. } => ErrorCategory::Unprocessable,
            DomainError::Conflict(_) => ErrorCategory::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_failures_are_unprocessable_not_invalid_input() {
        let err = DomainError::InsufficientStock {
            requested: 5,
            available: 2,
        };
        assert_eq!(err.category(), ErrorCategory::Unprocessable);
        assert_eq!(
            DomainError::negative_result("x").category(),
            ErrorCategory::Unprocessable
        );
        assert_eq!(
            DomainError::invalid_input("x").category(),
            ErrorCategory::InvalidInput
        );
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = DomainError::not_found("part", "abc");
        assert_eq!(err.to_string(), "part not found: abc");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
