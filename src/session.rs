use std::sync::Arc;

use mockable::Clock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    credential::{User, UserId},
    store::{CredentialStore, StoreError, TokenStore},
    token::TokenValue,
};

/// Why a presented credential was not accepted. Kept for logs; callers only
/// ever see a generic authentication failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("no credential presented")]
    NoCredential,
    #[error("credential is malformed")]
    Malformed,
    #[error("credential is invalid or expired")]
    InvalidOrExpired,
    #[error("credential refers to an unknown user")]
    UnknownUser,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The authenticated user of one request.
///
/// Only [`Authenticator::authenticate`] produces it, so an operation taking an
/// `&Identity` cannot be handed a user id from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user: User,
}

impl Identity {
    pub(crate) fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }
}

#[derive(Clone)]
pub struct Authenticator {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Authenticator {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            tokens,
            users,
            clock,
        }
    }

    /// Resolves a presented bearer credential to an [`Identity`].
    /// Read-only: the session's expiry is never extended.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, SessionError> {
        let raw = credential
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(Rejection::NoCredential)?;

        let Some(token) = TokenValue::parse(raw) else {
            warn!("rejected malformed credential");
            return Err(Rejection::Malformed.into());
        };
        let digest = token.digest();

        let Some(user_id) = self.tokens.find_active(&digest, self.clock.utc()).await? else {
            warn!(token = digest.short(), "rejected invalid or expired session");
            return Err(Rejection::InvalidOrExpired.into());
        };

        let Some(record) = self.users.find_by_id(user_id).await? else {
            warn!(token = digest.short(), %user_id, "session refers to unknown user");
            return Err(Rejection::UnknownUser.into());
        };

        debug!(%user_id, "authenticated");
        Ok(Identity::new(record.user))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::{
        credential::{Email, HashedPassword, NewUser},
        store::memory::InMemoryIdentityStore,
        test_support::MutableClock,
    };

    struct Fixture {
        store: Arc<InMemoryIdentityStore>,
        clock: Arc<MutableClock>,
        auth: Authenticator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryIdentityStore::default());
        let clock = Arc::new(MutableClock::new(Utc::now()));
        let auth = Authenticator::new(store.clone(), store.clone(), clock.clone());
        Fixture { store, clock, auth }
    }

    async fn user(store: &InMemoryIdentityStore) -> User {
        store
            .insert_user(NewUser {
                name: "Alice".to_owned(),
                email: Email::parse("alice@example.com").unwrap(),
                password_hash: HashedPassword::from_phc("$argon2id$x".to_owned()),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    fn rejection(result: Result<Identity, SessionError>) -> Rejection {
        match result {
            Err(SessionError::Rejected(rejection)) => rejection,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_and_malformed() {
        let f = fixture();
        assert_eq!(rejection(f.auth.authenticate(None).await), Rejection::NoCredential);
        assert_eq!(
            rejection(f.auth.authenticate(Some("  ")).await),
            Rejection::NoCredential
        );
        assert_eq!(
            rejection(f.auth.authenticate(Some("not-a-token")).await),
            Rejection::Malformed
        );
    }

    #[tokio::test]
    async fn token_lifecycle() {
        let f = fixture();
        let alice = user(&f.store).await;
        let issued = f
            .store
            .issue(alice.id, TimeDelta::minutes(30), f.clock.utc())
            .await
            .unwrap();

        let identity = f.auth.authenticate(Some(issued.value.expose())).await.unwrap();
        assert_eq!(identity.user_id(), alice.id);
        assert_eq!(identity.user(), &alice);

        // use does not extend the session
        f.clock.advance(TimeDelta::minutes(29));
        assert!(f.auth.authenticate(Some(issued.value.expose())).await.is_ok());
        f.clock.advance(TimeDelta::minutes(1));
        assert_eq!(
            rejection(f.auth.authenticate(Some(issued.value.expose())).await),
            Rejection::InvalidOrExpired
        );
    }

    #[tokio::test]
    async fn revoked_and_unknown() {
        let f = fixture();
        let alice = user(&f.store).await;
        let issued = f
            .store
            .issue(alice.id, TimeDelta::minutes(30), f.clock.utc())
            .await
            .unwrap();
        f.store.revoke(&issued.value).await.unwrap();
        assert_eq!(
            rejection(f.auth.authenticate(Some(issued.value.expose())).await),
            Rejection::InvalidOrExpired
        );

        // well formed but never issued reads the same as revoked
        let never = TokenValue::generate();
        assert_eq!(
            rejection(f.auth.authenticate(Some(never.expose())).await),
            Rejection::InvalidOrExpired
        );

        let orphan = f
            .store
            .issue(UserId(999), TimeDelta::minutes(30), f.clock.utc())
            .await
            .unwrap();
        assert_eq!(
            rejection(f.auth.authenticate(Some(orphan.value.expose())).await),
            Rejection::UnknownUser
        );
    }
}
