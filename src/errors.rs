//! Unified error types for the referral ledger.
//!
//! Every fallible function in the crate returns [`Result`]. Variants carry the
//! data a caller needs to react; [`Error::kind`] folds them into the coarse
//! classes the API layer and retry logic care about.

use crate::entities::referral_record::ReferralStatus;
use sea_orm::DbErr;
use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Database/storage failure
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O failure (config file, listener socket)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment variable
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// Response or cache payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Monetary amount is zero or negative where a positive value is required
    #[error("Invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount {
        /// The rejected amount in minor units
        amount: i64,
    },

    /// Request data failed validation
    #[error("Invalid input: {message}")]
    Validation {
        /// Human-readable reason
        message: String,
    },

    /// Referral code does not exist
    #[error("Unknown referral code '{code}'")]
    InvalidCode {
        /// The code that was looked up
        code: String,
    },

    /// User tried to sign up with their own code
    #[error("User {user_id} cannot refer themselves")]
    SelfReferral {
        /// The offending user
        user_id: String,
    },

    /// Referred user already has a referral record
    #[error("User {user_id} has already been referred")]
    AlreadyReferred {
        /// The referred user
        user_id: String,
    },

    /// Status change not allowed from the record's current status
    #[error("Referral {referral_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Referral record id
        referral_id: i64,
        /// Current status
        from: ReferralStatus,
        /// Requested status
        to: ReferralStatus,
    },

    /// Referral record does not exist
    #[error("Referral {referral_id} not found")]
    ReferralNotFound {
        /// Requested id
        referral_id: i64,
    },

    /// Could not find a free referral code within the retry bound
    #[error("Could not generate a unique referral code for {user_id} after {attempts} attempts")]
    CodeGenerationConflict {
        /// User the code was for
        user_id: String,
        /// Attempts made
        attempts: u32,
    },

    /// Debit would take the balance below zero
    #[error("Insufficient balance on account {account_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        /// Account that was debited
        account_id: String,
        /// Balance at the time of the check
        balance: i64,
        /// Requested debit
        required: i64,
    },

    /// A concurrent writer won a race that could not be resolved locally
    #[error("Conflict: {message}")]
    Conflict {
        /// What conflicted
        message: String,
    },

    /// Caller lacks the role required for the operation
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why access was denied
        message: String,
    },
}

/// Coarse error classes used for retry decisions and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried automatically
    Validation,
    /// Requested entity does not exist
    NotFound,
    /// Race lost to another writer
    Conflict,
    /// Debit rejected
    InsufficientBalance,
    /// Caller not allowed
    Forbidden,
    /// Transient storage failure; safe to retry with the same idempotency key
    Storage,
    /// Needs an operator
    Fatal,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::Validation { .. }
            | Self::InvalidCode { .. }
            | Self::SelfReferral { .. }
            | Self::AlreadyReferred { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::ReferralNotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::CodeGenerationConflict { .. } => ErrorKind::Conflict,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Database(_) => ErrorKind::Storage,
            Self::Config { .. } | Self::Io(_) | Self::EnvVar(_) | Self::Serialization(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Stable machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Database(_) => "storage_unavailable",
            Self::Io(_) | Self::EnvVar(_) | Self::Serialization(_) => "internal",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::Validation { .. } => "validation",
            Self::InvalidCode { .. } => "invalid_code",
            Self::SelfReferral { .. } => "self_referral",
            Self::AlreadyReferred { .. } => "already_referred",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ReferralNotFound { .. } => "referral_not_found",
            Self::CodeGenerationConflict { .. } => "code_generation_conflict",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Conflict { .. } => "conflict",
            Self::Forbidden { .. } => "forbidden",
        }
    }

    /// Whether the same call may be retried unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Storage | ErrorKind::Conflict)
    }

    /// Returns true when the underlying database error is a unique index violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(e) => is_unique_violation(e),
            _ => false,
        }
    }
}

/// Returns true when `err` was raised by a unique constraint.
#[must_use]
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = Error::SelfReferral {
            user_id: "u1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = Error::InvalidAmount { amount: -5 };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = Error::from(DbErr::Custom("connection reset".to_string()));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_transition_error_message() {
        let err = Error::InvalidTransition {
            referral_id: 7,
            from: ReferralStatus::Completed,
            to: ReferralStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "Referral 7 cannot move from completed to cancelled"
        );
    }
}
