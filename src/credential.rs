use std::{fmt, sync::Arc};

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::PasswordPolicy,
    store::{CredentialStore, StoreError},
};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An email address as entered, with a lower-cased key used for lookups and uniqueness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    address: String,
    key: String,
}

impl Email {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let address = raw.trim();
        match address.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self {
                    address: address.to_owned(),
                    key: address.to_lowercase(),
                })
            }
            _ => Err(CredentialError::InvalidInput(
                "email address is not valid".to_owned(),
            )),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// PHC-formatted Argon2id hash. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword(String);

impl HashedPassword {
    pub fn from_phc(phc: String) -> Self {
        Self(phc)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedPassword(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user: User,
    pub password_hash: HashedPassword,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Email,
    pub password_hash: HashedPassword,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Argon2id hashing with configurable cost.
/// Both operations run on the blocking pool, they are deliberately slow.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
    // verified against when the email is unknown so both paths cost the same
    dummy: Arc<HashedPassword>,
}

impl CredentialHasher {
    pub fn new(policy: &PasswordPolicy) -> Result<Self, CredentialError> {
        let params = Params::new(
            policy.memory_kib,
            policy.iterations,
            policy.parallelism,
            None,
        )
        .map_err(|err| CredentialError::Hashing(err.to_string()))?;
        let dummy = hash_with(&params, "correct horse battery staple")?;
        Ok(Self {
            params,
            dummy: Arc::new(dummy),
        })
    }

    pub async fn hash(&self, password: &str) -> Result<HashedPassword, CredentialError> {
        let params = self.params.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hash_with(&params, &password))
            .await
            .map_err(|err| CredentialError::Hashing(err.to_string()))?
    }

    /// Verifies `password` against `stored`, or against the dummy hash when
    /// there is no stored hash. The latter always yields `false`.
    pub async fn verify(
        &self,
        password: &str,
        stored: Option<&HashedPassword>,
    ) -> Result<bool, CredentialError> {
        let known = stored.is_some();
        let phc = stored.unwrap_or(self.dummy.as_ref()).clone();
        let password = password.to_owned();
        let matched = tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(phc.as_str())
                .map_err(|err| CredentialError::Hashing(err.to_string()))?;
            Ok::<_, CredentialError>(
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
            )
        })
        .await
        .map_err(|err| CredentialError::Hashing(err.to_string()))??;
        Ok(known && matched)
    }
}

fn hash_with(params: &Params, password: &str) -> Result<HashedPassword, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| HashedPassword(hash.to_string()))
        .map_err(|err| CredentialError::Hashing(err.to_string()))
}

fn validate_password(password: &str) -> Result<(), CredentialError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Credential store operations: registration, password verification and password change.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
    hasher: CredentialHasher,
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>, hasher: CredentialHasher) -> Self {
        Self { store, hasher }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<User, CredentialError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CredentialError::InvalidInput("name is required".to_owned()));
        }
        let email = Email::parse(email)?;
        validate_password(password)?;

        // cheap early exit; the store's unique key settles races
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(CredentialError::DuplicateEmail);
        }
        let password_hash = self.hasher.hash(password).await?;
        let user = self
            .store
            .insert_user(NewUser {
                name: name.to_owned(),
                email,
                password_hash,
                created_at: now,
            })
            .await
            .map_err(|err| match err {
                StoreError::Duplicate(_) => CredentialError::DuplicateEmail,
                err => CredentialError::Store(err),
            })?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn verify(&self, email: &str, password: &str) -> Result<User, CredentialError> {
        let record = match Email::parse(email) {
            Ok(email) => self.store.find_by_email(&email).await?,
            Err(_) => None,
        };
        let matched = self
            .hasher
            .verify(password, record.as_ref().map(|r| &r.password_hash))
            .await?;
        match record {
            Some(record) if matched => Ok(record.user),
            Some(record) => {
                warn!(user_id = %record.user.id, "password mismatch");
                Err(CredentialError::InvalidCredentials)
            }
            None => {
                warn!("login for unknown email");
                Err(CredentialError::InvalidCredentials)
            }
        }
    }

    pub async fn change_password(
        &self,
        user_id: UserId,
        current: &str,
        new: &str,
    ) -> Result<(), CredentialError> {
        let record = self.store.find_by_id(user_id).await?;
        let matched = self
            .hasher
            .verify(current, record.as_ref().map(|r| &r.password_hash))
            .await?;
        if !matched {
            warn!(%user_id, "password change with wrong current password");
            return Err(CredentialError::InvalidCredentials);
        }
        validate_password(new)?;
        let hash = self.hasher.hash(new).await?;
        self.store.update_password(user_id, hash).await?;
        info!(%user_id, "password changed");
        Ok(())
    }

    pub async fn find_user(&self, user_id: UserId) -> Result<Option<User>, CredentialError> {
        Ok(self.store.find_by_id(user_id).await?.map(|r| r.user))
    }
}
