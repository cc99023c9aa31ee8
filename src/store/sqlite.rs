//! SQLite adapters. Identity (users, sessions) and ledger (accounts, transfers)
//! live in separate pools so they can point at separate database files.
//!
//! Money is stored as integer minor units and timestamps as unix milliseconds,
//! which keeps the conditional debit and expiry comparisons exact.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Executor, Row, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use tracing::{debug, info};

use crate::{
    account::{Account, AccountError, AccountNumber, NewAccount, from_minor_units, minor_units},
    credential::{Email, HashedPassword, NewUser, User, UserId, UserRecord},
    ledger::{PendingTransfer, TransferKind, TransferRecord},
    token::{SessionRecord, TokenDigest},
};

use super::{AccountStore, CredentialStore, Ledger, StoreError, TokenStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

async fn open_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {millis} out of range")))
}

/// Drops sub-millisecond precision so returned values match what is stored.
fn truncate(at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
    timestamp(at.timestamp_millis())
}

fn to_minor(amount: rust_decimal::Decimal) -> Result<i64, StoreError> {
    minor_units(amount)
        .ok_or_else(|| StoreError::Corrupt(format!("amount {amount} is not representable")))
}

fn unique_violation(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        _ => StoreError::Database(err),
    }
}

/// Users and session tokens.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let store = Self {
            pool: open_pool(url, max_connections).await?,
        };
        store.init().await?;
        info!(url, "identity store ready");
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                email_key TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_tokens (
                token_digest TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_session_tokens_user
            ON session_tokens(user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn user_record(row: &SqliteRow) -> Result<UserRecord, StoreError> {
        Ok(UserRecord {
            user: User {
                id: UserId(row.try_get("user_id")?),
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                created_at: timestamp(row.try_get("created_at")?)?,
            },
            password_hash: HashedPassword::from_phc(row.try_get("password_hash")?),
        })
    }
}

#[async_trait]
impl CredentialStore for SqliteIdentityStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let created_at = truncate(new.created_at)?;
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, email_key, password_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(new.email.address())
        .bind(new.email.key())
        .bind(new.password_hash.as_str())
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "email"))?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            name: new.name,
            email: new.email.address().to_owned(),
            created_at,
        })
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query("SELECT * FROM users WHERE email_key = ?")
            .bind(email.key())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::user_record)
            .transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query("SELECT * FROM users WHERE user_id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::user_record)
            .transpose()
    }

    async fn update_password(&self, id: UserId, hash: HashedPassword) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE user_id = ?")
            .bind(hash.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteIdentityStore {
    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_tokens (token_digest, user_id, issued_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(record.digest.as_str())
        .bind(record.user_id.0)
        .bind(record.issued_at.timestamp_millis())
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "session token"))?;
        Ok(())
    }

    async fn find_active(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id FROM session_tokens WHERE token_digest = ? AND expires_at > ?",
        )
        .bind(digest.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|row| row.try_get::<i64, _>("user_id"))
            .transpose()?
            .map(UserId))
    }

    async fn delete(&self, digest: &TokenDigest) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_tokens WHERE token_digest = ?")
            .bind(digest.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Accounts and transfer records.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let store = Self {
            pool: open_pool(url, max_connections).await?,
        };
        store.init().await?;
        info!(url, "ledger store ready");
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                account_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                account_number TEXT NOT NULL UNIQUE,
                account_type TEXT NOT NULL,
                account_name TEXT NOT NULL,
                balance_minor INTEGER NOT NULL CHECK (balance_minor >= 0),
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_accounts_owner
            ON accounts(user_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                transfer_id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_account TEXT NOT NULL,
                to_account TEXT NOT NULL,
                amount_minor INTEGER NOT NULL CHECK (amount_minor > 0),
                transfer_type TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for column in ["from_account", "to_account"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_transfers_{column} ON transfers({column})"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn account(row: &SqliteRow) -> Result<Account, StoreError> {
        Ok(Account {
            id: row.try_get("account_id")?,
            owner: UserId(row.try_get("user_id")?),
            number: AccountNumber::from(row.try_get::<String, _>("account_number")?),
            account_type: row.try_get("account_type")?,
            display_name: row.try_get("account_name")?,
            balance: from_minor_units(row.try_get("balance_minor")?),
            created_at: timestamp(row.try_get("created_at")?)?,
        })
    }

    fn transfer(row: &SqliteRow) -> Result<TransferRecord, StoreError> {
        let kind: String = row.try_get("transfer_type")?;
        Ok(TransferRecord {
            id: row.try_get("transfer_id")?,
            from: AccountNumber::from(row.try_get::<String, _>("from_account")?),
            to: AccountNumber::from(row.try_get::<String, _>("to_account")?),
            amount: from_minor_units(row.try_get("amount_minor")?),
            kind: kind.parse::<TransferKind>().map_err(StoreError::Corrupt)?,
            description: row.try_get("description")?,
            created_at: timestamp(row.try_get("created_at")?)?,
        })
    }
}

async fn insert_transfer<'e, E>(
    executor: E,
    mut transfer: PendingTransfer,
) -> Result<TransferRecord, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    transfer.requested_at = truncate(transfer.requested_at)?;
    let result = sqlx::query(
        r#"
        INSERT INTO transfers (from_account, to_account, amount_minor, transfer_type, description, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transfer.from.as_str())
    .bind(transfer.to.as_str())
    .bind(to_minor(transfer.amount)?)
    .bind(transfer.kind.as_str())
    .bind(&transfer.description)
    .bind(transfer.requested_at.timestamp_millis())
    .execute(executor)
    .await?;
    Ok(TransferRecord::settled(result.last_insert_rowid(), transfer))
}

#[async_trait]
impl AccountStore for SqliteLedgerStore {
    async fn insert(
        &self,
        account: NewAccount,
        number: AccountNumber,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let now = truncate(now)?;
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, account_number, account_type, account_name, balance_minor, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.owner.0)
        .bind(number.as_str())
        .bind(&account.account_type)
        .bind(&account.display_name)
        .bind(to_minor(account.opening_balance)?)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|err| unique_violation(err, "account number"))?;

        Ok(Account::open(result.last_insert_rowid(), number, account, now))
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        sqlx::query(
            "SELECT * FROM accounts WHERE user_id = ? ORDER BY created_at DESC, account_id DESC",
        )
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::account)
        .collect()
    }

    async fn get_by_number(
        &self,
        number: &AccountNumber,
        owner: Option<UserId>,
    ) -> Result<Option<Account>, StoreError> {
        let row = match owner {
            Some(owner) => {
                sqlx::query("SELECT * FROM accounts WHERE account_number = ? AND user_id = ?")
                    .bind(number.as_str())
                    .bind(owner.0)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM accounts WHERE account_number = ?")
                    .bind(number.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        row.as_ref().map(Self::account).transpose()
    }
}

#[async_trait]
impl Ledger for SqliteLedgerStore {
    async fn append(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError> {
        insert_transfer(&self.pool, transfer).await
    }

    async fn settle(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError> {
        let amount = to_minor(transfer.amount)?;
        // dropping `tx` on any early return rolls everything back
        let mut tx = self.pool.begin().await?;

        // writing first takes the database write lock before anything is read
        let debited = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_minor = balance_minor - ?
            WHERE account_number = ? AND balance_minor >= ?
            "#,
        )
        .bind(amount)
        .bind(transfer.from.as_str())
        .bind(amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if debited == 0 {
            let exists = sqlx::query("SELECT 1 FROM accounts WHERE account_number = ?")
                .bind(transfer.from.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            debug!(from = %transfer.from, exists, "conditional debit matched no row");
            return Err(if exists {
                StoreError::Account(AccountError::InsufficientFunds)
            } else {
                StoreError::NotFound
            });
        }

        // sqlite turns an overflowing integer into REAL, so the headroom is checked here
        let credited = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_minor = balance_minor + ?
            WHERE account_number = ? AND balance_minor <= ?
            "#,
        )
        .bind(amount)
        .bind(transfer.to.as_str())
        .bind(i64::MAX - amount)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if credited == 0 {
            let exists = sqlx::query("SELECT 1 FROM accounts WHERE account_number = ?")
                .bind(transfer.to.as_str())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            debug!(to = %transfer.to, exists, "conditional credit matched no row");
            return Err(if exists {
                StoreError::Account(AccountError::BalanceOverflow)
            } else {
                StoreError::NotFound
            });
        }

        let record = insert_transfer(&mut *tx, transfer).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn list_involving(
        &self,
        numbers: &[AccountNumber],
    ) -> Result<Vec<TransferRecord>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; numbers.len()].join(", ");
        let sql = format!(
            "SELECT * FROM transfers \
             WHERE from_account IN ({placeholders}) OR to_account IN ({placeholders}) \
             ORDER BY created_at DESC, transfer_id DESC"
        );
        let mut query = sqlx::query(&sql);
        for number in numbers.iter().chain(numbers) {
            query = query.bind(number.as_str());
        }
        query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::transfer)
            .collect()
    }
}
