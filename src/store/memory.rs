use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::{
    account::{Account, AccountNumber, NewAccount},
    credential::{Email, HashedPassword, NewUser, User, UserId, UserRecord},
    ledger::{PendingTransfer, TransferRecord, newest_first},
    token::{SessionRecord, TokenDigest},
};

use super::{AccountStore, CredentialStore, Ledger, StoreError, TokenStore};

#[derive(Default)]
struct Users {
    by_id: HashMap<UserId, UserRecord>,
    by_email: HashMap<String, UserId>,
    last_id: i64,
}

/// Users and session tokens held in process memory.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<Users>,
    sessions: RwLock<HashMap<TokenDigest, SessionRecord>>,
}

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        let id = UserId(users.last_id + 1);
        match users.by_email.entry(new.email.key().to_owned()) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate("email")),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        users.last_id = id.0;
        let user = User {
            id,
            name: new.name,
            email: new.email.address().to_owned(),
            created_at: new.created_at,
        };
        users.by_id.insert(
            id,
            UserRecord {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(user)
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .by_email
            .get(email.key())
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }

    async fn update_password(&self, id: UserId, hash: HashedPassword) -> Result<(), StoreError> {
        match self.users.write().await.by_id.get_mut(&id) {
            Some(record) => {
                record.password_hash = hash;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryIdentityStore {
    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError> {
        match self.sessions.write().await.entry(record.digest.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("session token")),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn find_active(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(digest)
            .filter(|record| record.is_active(now))
            .map(|record| record.user_id))
    }

    async fn delete(&self, digest: &TokenDigest) -> Result<(), StoreError> {
        self.sessions.write().await.remove(digest);
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.is_active(now));
        Ok((before - sessions.len()) as u64)
    }
}

/// Accounts and transfer records held in process memory.
///
/// Each account sits behind its own mutex. Settlement locks the two rows in
/// account-number order, so opposite transfers between the same pair cannot
/// deadlock, and transfers on disjoint accounts run in parallel.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<HashMap<AccountNumber, Arc<Mutex<Account>>>>,
    last_account_id: AtomicI64,
    transfers: Mutex<Vec<TransferRecord>>,
}

impl InMemoryLedgerStore {
    async fn row(&self, number: &AccountNumber) -> Result<Arc<Mutex<Account>>, StoreError> {
        self.accounts
            .read()
            .await
            .get(number)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn insert(
        &self,
        account: NewAccount,
        number: AccountNumber,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        let Entry::Vacant(entry) = accounts.entry(number.clone()) else {
            return Err(StoreError::Duplicate("account number"));
        };
        let id = self.last_account_id.fetch_add(1, Ordering::Relaxed) + 1;
        let account = Account::open(id, number, account, now);
        entry.insert(Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut owned = Vec::new();
        for row in rows {
            let account = row.lock().await;
            if account.owner == owner {
                owned.push(account.clone());
            }
        }
        owned.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(owned)
    }

    async fn get_by_number(
        &self,
        number: &AccountNumber,
        owner: Option<UserId>,
    ) -> Result<Option<Account>, StoreError> {
        let row = match self.row(number).await {
            Ok(row) => row,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        let account = row.lock().await.clone();
        Ok(owner
            .is_none_or(|owner| account.owner == owner)
            .then_some(account))
    }
}

#[async_trait]
impl Ledger for InMemoryLedgerStore {
    async fn append(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError> {
        let mut transfers = self.transfers.lock().await;
        let id = transfers.len() as i64 + 1;
        let record = TransferRecord::settled(id, transfer);
        transfers.push(record.clone());
        Ok(record)
    }

    async fn settle(&self, transfer: PendingTransfer) -> Result<TransferRecord, StoreError> {
        let source = self.row(&transfer.from).await?;
        let destination = self.row(&transfer.to).await?;

        if Arc::ptr_eq(&source, &destination) {
            let account = source.lock().await;
            account.handle_debit(transfer.amount)?;
            // debit and credit cancel out; only the record remains
            return self.append(transfer).await;
        }

        let (first, second) = if transfer.from < transfer.to {
            (&source, &destination)
        } else {
            (&destination, &source)
        };
        let mut first = first.lock().await;
        let mut second = second.lock().await;
        let (source, destination) = if transfer.from < transfer.to {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let debit = source.handle_debit(transfer.amount)?;
        let credit = destination.handle_credit(transfer.amount)?;
        let record = self.append(transfer).await?;
        source.apply(&debit);
        destination.apply(&credit);
        Ok(record)
    }

    async fn list_involving(
        &self,
        numbers: &[AccountNumber],
    ) -> Result<Vec<TransferRecord>, StoreError> {
        let numbers: HashSet<_> = numbers.iter().collect();
        let mut records: Vec<_> = self
            .transfers
            .lock()
            .await
            .iter()
            .filter(|record| record.involves(&numbers))
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }
}
