//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod booking_completion;
pub mod referral_code;
pub mod referral_record;
pub mod wallet_account;
pub mod wallet_transaction;

// Re-export specific types to avoid conflicts
pub use booking_completion::{
    Column as BookingCompletionColumn, Entity as BookingCompletion,
    Model as BookingCompletionModel,
};
pub use referral_code::{
    Column as ReferralCodeColumn, Entity as ReferralCode, Model as ReferralCodeModel,
};
pub use referral_record::{
    Column as ReferralRecordColumn, Entity as ReferralRecord, Model as ReferralRecordModel,
    ReferralStatus,
};
pub use wallet_account::{
    Column as WalletAccountColumn, Entity as WalletAccount, Model as WalletAccountModel,
};
pub use wallet_transaction::{
    Column as WalletTransactionColumn, Entity as WalletTransaction,
    Model as WalletTransactionModel, TransactionType,
};
