use async_trait::async_trait;
use thiserror::Error;

use super::models::{Account, NewAccount};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found")]
    NotFound,
    #[error("account {account_id} was modified after version {version}")]
    Conflict { account_id: i32, version: i64 },
    #[error("email `{0}` already registered")]
    DuplicateEmail(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt account record {account_id}: {reason}")]
    Corrupt { account_id: i32, reason: String },
}

/// key: account-store -> persistence contract
///
/// `save` is a compare-and-swap on `Account::version`: it only succeeds when
/// the stored version still equals the one the caller read, and returns the
/// account carrying the bumped version.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: i32) -> Result<Account, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn save(&self, account: &Account) -> Result<Account, StoreError>;

    /// Ids of accounts whose subscription still references the provider.
    async fn list_with_external_subscription(&self) -> Result<Vec<i32>, StoreError>;
}
