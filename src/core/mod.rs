//! Core business logic - framework-agnostic ledger, referral and reward operations.
//!
//! Every function takes a database connection (or an open database transaction) and
//! returns a crate [`Result`](crate::errors::Result). The HTTP layer in [`crate::api`]
//! is a thin adapter over these modules.

/// Conversion analytics (read-only aggregates)
pub mod analytics;
/// Booking event bridge and booking history
pub mod booking;
/// Wallet ledger
pub mod ledger;
/// Offset pagination helpers
pub mod pagination;
/// Projection audits and partial-reward healing
pub mod reconcile;
/// Referral registry
pub mod referral;
/// Reward rule engine
pub mod reward;
