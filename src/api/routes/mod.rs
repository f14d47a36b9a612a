//! Route handlers, grouped by URL prefix.

pub mod internal;
pub mod referrals;
pub mod wallet;
