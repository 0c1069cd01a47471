use thiserror::Error;

use cmms_auth::AuthzError;
use cmms_core::{DomainError, ErrorCategory};

use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error returned by every service in this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthzError> for LedgerError {
    fn from(value: AuthzError) -> Self {
        LedgerError::Domain(value.into())
    }
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::Domain(e) => e.category(),
            LedgerError::Store(StoreError::DuplicateKey(_)) => ErrorCategory::Conflict,
            LedgerError::Store(StoreError::TenantIsolation(_)) => ErrorCategory::Forbidden,
            LedgerError::Store(StoreError::Backend(_) | StoreError::Unavailable(_)) => {
                ErrorCategory::Unavailable
            }
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(e) => Some(e),
            LedgerError::Store(_) => None,
        }
    }
}
