use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
    account::{Account, AccountError, AccountNumber, NewAccount},
    credential::{Email, HashedPassword, NewUser, User, UserId, UserRecord},
    ledger::{PendingTransfer, TransferRecord},
    token::{IssuedToken, SessionRecord, TokenDigest, TokenValue},
};

pub mod memory;
pub mod sqlite;

const CREATE_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(&'static str),
    #[error("Record not found")]
    NotFound,
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("Session expiry is out of range")]
    ExpiryOutOfRange,
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Users and their password hashes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the email key is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_by_email(&self, email: &Email) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn update_password(&self, id: UserId, hash: HashedPassword) -> Result<(), StoreError>;
}

/// Issued session tokens, keyed by digest. The only authority on token validity.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Returns the owner only if the record exists and `expires_at > now`.
    async fn find_active(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError>;

    /// Deleting an absent digest is not an error.
    async fn delete(&self, digest: &TokenDigest) -> Result<(), StoreError>;

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn issue(
        &self,
        user_id: UserId,
        ttl: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, StoreError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(StoreError::ExpiryOutOfRange)?;
        let mut attempt = 0;
        loop {
            let value = TokenValue::generate();
            let record = SessionRecord {
                digest: value.digest(),
                user_id,
                issued_at: now,
                expires_at,
            };
            match self.insert(record.clone()).await {
                Ok(()) => {
                    return Ok(IssuedToken {
                        value,
                        user_id,
                        issued_at: record.issued_at,
                        expires_at: record.expires_at,
                    });
                }
                Err(StoreError::Duplicate(_)) if attempt + 1 < CREATE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn resolve(
        &self,
        token: &TokenValue,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        self.find_active(&token.digest(), now).await
    }

    async fn revoke(&self, token: &TokenValue) -> Result<(), StoreError> {
        self.delete(&token.digest()).await
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] when the account number is taken.
    async fn insert(
        &self,
        account: NewAccount,
        number: AccountNumber,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Most recently created first.
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError>;

    /// With `owner` set, accounts of other users are reported as absent.
    async fn get_by_number(
        &self,
        number: &AccountNumber,
        owner: Option<UserId>,
    ) -> Result<Option<Account>, StoreError>;

    async fn create(&self, account: NewAccount, now: DateTime<Utc>) -> Result<Account, StoreError> {
        let mut attempt = 0;
        loop {
            let number = AccountNumber::generate(now);
            match self.insert(account.clone(), number, now).await {
                Err(StoreError::Duplicate(what)) if attempt + 1 < CREATE_ATTEMPTS => {
                    debug!(what, attempt, "account number collision, regenerating");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Pure insert of a record. Does not touch balances.
    async fn append(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError>;

    /// Debits the source, credits the destination and appends the record as one unit.
    /// The solvency check is repeated under the same lock or transaction as the debit.
    /// On error nothing is changed.
    async fn settle(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError>;

    /// Records where any of `numbers` is either side, newest first.
    async fn list_involving(
        &self,
        numbers: &[AccountNumber],
    ) -> Result<Vec<TransferRecord>, StoreError>;
}
