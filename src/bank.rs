use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    account::{Account, AccountNumber, NewAccount},
    command::TransferCommand,
    config::BankConfig,
    credential::{CredentialHasher, Credentials, User},
    error::BankError,
    ledger::TransferRecord,
    session::{Authenticator, Identity, Rejection, SessionError},
    store::{
        AccountStore, CredentialStore, Ledger, TokenStore,
        memory::{InMemoryIdentityStore, InMemoryLedgerStore},
        sqlite::{SqliteIdentityStore, SqliteLedgerStore},
    },
    token::TokenValue,
    transfer::{TransferEngine, TransferError},
};

/// The four persistence ports. Identity (users, tokens) and ledger (accounts,
/// transfers) may live in different databases.
#[derive(Clone)]
pub struct BankStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn Ledger>,
}

impl BankStores {
    pub fn in_memory() -> Self {
        let identity = Arc::new(InMemoryIdentityStore::default());
        let ledger = Arc::new(InMemoryLedgerStore::default());
        Self {
            credentials: identity.clone(),
            tokens: identity,
            accounts: ledger.clone(),
            ledger,
        }
    }

    pub fn sqlite(identity: SqliteIdentityStore, ledger: SqliteLedgerStore) -> Self {
        let identity = Arc::new(identity);
        let ledger = Arc::new(ledger);
        Self {
            credentials: identity.clone(),
            tokens: identity,
            accounts: ledger.clone(),
            ledger,
        }
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub account: Account,
}

/// Result of a successful login. `token` is the bearer credential for later calls.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: TokenValue,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

pub struct Bank {
    config: BankConfig,
    credentials: Credentials,
    tokens: Arc<dyn TokenStore>,
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    authenticator: Authenticator,
    engine: TransferEngine,
    clock: Arc<dyn Clock + Send + Sync>,
    /// Held while a login re-opens a missing default account.
    repair: Mutex<()>,
}

impl Bank {
    pub fn new(
        stores: BankStores,
        config: BankConfig,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self, BankError> {
        config.validate()?;
        let hasher = CredentialHasher::new(&config.password)?;
        let BankStores {
            credentials,
            tokens,
            accounts,
            ledger,
        } = stores;
        Ok(Self {
            authenticator: Authenticator::new(tokens.clone(), credentials.clone(), clock.clone()),
            engine: TransferEngine::new(accounts.clone(), ledger.clone(), clock.clone()),
            credentials: Credentials::new(credentials, hasher),
            tokens,
            accounts,
            ledger,
            config,
            clock,
            repair: Mutex::new(()),
        })
    }

    pub fn in_memory(config: BankConfig) -> Result<Self, BankError> {
        Self::new(BankStores::in_memory(), config, Arc::new(DefaultClock))
    }

    /// Creates the user and their default account.
    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Registration, BankError> {
        let user = self
            .credentials
            .register(name, email, password, self.clock.utc())
            .await?;
        let account = self.open_default_account(&user).await?;
        Ok(Registration { user, account })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, BankError> {
        let user = self.credentials.verify(email, password).await?;
        if self.accounts.list_for_owner(user.id).await?.is_empty() {
            // registration stored the user but its ledger write failed
            self.repair_default_account(&user).await?;
        }
        let issued = self
            .tokens
            .issue(user.id, self.config.session_ttl(), self.clock.utc())
            .await?;
        info!(user_id = %user.id, token = issued.value.digest().short(), "logged in");
        Ok(Session {
            token: issued.value,
            user,
            expires_at: issued.expires_at,
        })
    }

    /// Revokes the presented token. Unknown, expired or malformed tokens are
    /// accepted silently; only a missing credential is an error.
    pub async fn logout(&self, credential: Option<&str>) -> Result<(), BankError> {
        let raw = credential
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(SessionError::Rejected(Rejection::NoCredential))?;
        if let Some(token) = TokenValue::parse(raw) {
            self.tokens.revoke(&token).await?;
            info!(token = token.digest().short(), "logged out");
        }
        Ok(())
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, BankError> {
        Ok(self.authenticator.authenticate(credential).await?)
    }

    /// Profile as currently stored.
    pub async fn current_user(&self, identity: &Identity) -> Result<User, BankError> {
        self.credentials
            .find_user(identity.user_id())
            .await?
            .ok_or_else(|| SessionError::Rejected(Rejection::UnknownUser).into())
    }

    /// Changes the password and ends every session of the user, this one included.
    pub async fn change_password(
        &self,
        identity: &Identity,
        current: &str,
        new: &str,
    ) -> Result<(), BankError> {
        self.credentials
            .change_password(identity.user_id(), current, new)
            .await?;
        let revoked = self.tokens.revoke_all_for_user(identity.user_id()).await?;
        info!(user_id = %identity.user_id(), revoked, "sessions revoked after password change");
        Ok(())
    }

    pub async fn list_accounts(&self, identity: &Identity) -> Result<Vec<Account>, BankError> {
        let accounts = self.accounts.list_for_owner(identity.user_id()).await?;
        debug!(user_id = %identity.user_id(), count = accounts.len(), "listed accounts");
        Ok(accounts)
    }

    pub async fn create_account(
        &self,
        identity: &Identity,
        account_type: &str,
        display_name: &str,
    ) -> Result<Account, BankError> {
        let account_type = required("account type", account_type)?;
        let display_name = required("account name", display_name)?;
        let account = self
            .accounts
            .create(
                NewAccount {
                    owner: identity.user_id(),
                    account_type,
                    display_name,
                    opening_balance: self.config.opening_balance,
                },
                self.clock.utc(),
            )
            .await?;
        info!(user_id = %identity.user_id(), number = %account.number, "account opened");
        Ok(account)
    }

    /// Accounts of other users are reported as not found.
    pub async fn get_account(&self, identity: &Identity, number: &str) -> Result<Account, BankError> {
        let number = AccountNumber::from(number);
        self.accounts
            .get_by_number(&number, Some(identity.user_id()))
            .await?
            .ok_or(BankError::AccountNotFound(number))
    }

    pub async fn get_balance(&self, identity: &Identity, number: &str) -> Result<Decimal, BankError> {
        Ok(self.get_account(identity, number).await?.balance)
    }

    pub async fn transfer(
        &self,
        identity: &Identity,
        from: &str,
        to: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<TransferRecord, BankError> {
        let command = TransferCommand::parse(from, to, amount, description)
            .map_err(TransferError::from)?;
        Ok(self.engine.transfer(identity, command).await?)
    }

    /// Transfers touching any account of the user, newest first.
    pub async fn list_transactions(
        &self,
        identity: &Identity,
    ) -> Result<Vec<TransferRecord>, BankError> {
        let numbers: Vec<_> = self
            .accounts
            .list_for_owner(identity.user_id())
            .await?
            .into_iter()
            .map(|account| account.number)
            .collect();
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.ledger.list_involving(&numbers).await?)
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64, BankError> {
        let purged = self.tokens.purge_expired(self.clock.utc()).await?;
        info!(purged, "expired sessions purged");
        Ok(purged)
    }

    /// Re-checks under the lock, so concurrent logins of one user open a single account.
    async fn repair_default_account(&self, user: &User) -> Result<(), BankError> {
        let _guard = self.repair.lock().await;
        if self.accounts.list_for_owner(user.id).await?.is_empty() {
            self.open_default_account(user).await?;
        } else {
            debug!(user_id = %user.id, "default account already repaired");
        }
        Ok(())
    }

    async fn open_default_account(&self, user: &User) -> Result<Account, BankError> {
        let account = NewAccount {
            owner: user.id,
            account_type: self.config.default_account_type.clone(),
            display_name: self.config.default_account_name.clone(),
            opening_balance: self.config.opening_balance,
        };
        match self.accounts.create(account, self.clock.utc()).await {
            Ok(account) => {
                info!(user_id = %user.id, number = %account.number, "default account opened");
                Ok(account)
            }
            Err(err) => {
                error!(user_id = %user.id, %err, "could not open default account");
                Err(err.into())
            }
        }
    }
}

fn required(what: &str, value: &str) -> Result<String, BankError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BankError::InvalidInput(format!("{what} is required")));
    }
    Ok(value.to_owned())
}
