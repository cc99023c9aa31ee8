use std::fmt;

use thiserror::Error;

use crate::{
    account::AccountNumber,
    config::ConfigError,
    credential::CredentialError,
    session::{Rejection, SessionError},
    store::StoreError,
    transfer::TransferError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Auth,
    Authorization,
    NotFound,
    Conflict,
    Storage,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Auth => "auth_error",
            Self::Authorization => "authorization_error",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Storage => "storage_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Every failure of a [`crate::bank::Bank`] operation.
///
/// `Display` carries internal detail and is meant for logs. Callers get
/// [`BankError::kind`] and [`BankError::public_message`].
#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Account {0} not found")]
    AccountNotFound(AccountNumber),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::Duplicate(_) => ErrorKind::Conflict,
        StoreError::NotFound => ErrorKind::NotFound,
        StoreError::Account(_) => ErrorKind::Conflict,
        StoreError::ExpiryOutOfRange => ErrorKind::Validation,
        StoreError::Corrupt(_) | StoreError::Database(_) => ErrorKind::Storage,
    }
}

impl BankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Credential(err) => match err {
                CredentialError::InvalidInput(_) => ErrorKind::Validation,
                CredentialError::DuplicateEmail => ErrorKind::Conflict,
                CredentialError::InvalidCredentials => ErrorKind::Auth,
                CredentialError::Hashing(_) => ErrorKind::Storage,
                CredentialError::Store(err) => store_kind(err),
            },
            Self::Session(err) => match err {
                SessionError::Rejected(_) => ErrorKind::Auth,
                SessionError::Store(err) => store_kind(err),
            },
            Self::Transfer(err) => match err {
                TransferError::Command(_) | TransferError::SameAccount => ErrorKind::Validation,
                TransferError::Forbidden(_) => ErrorKind::Authorization,
                TransferError::UnknownDestination(_) => ErrorKind::NotFound,
                TransferError::Account(_) => ErrorKind::Conflict,
                TransferError::Store(err) => store_kind(err),
            },
            Self::InvalidInput(_) | Self::Config(_) => ErrorKind::Validation,
            Self::AccountNotFound(_) => ErrorKind::NotFound,
            Self::Store(err) => store_kind(err),
        }
    }

    /// Message safe to show to the caller. Authentication failures collapse
    /// into two fixed strings and storage failures carry no detail.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Auth => match self {
                Self::Session(SessionError::Rejected(Rejection::NoCredential)) => {
                    "authentication required".to_string()
                }
                _ => "invalid credentials".to_string(),
            },
            ErrorKind::Storage => "storage unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::{account::AccountError, command::TransferCommandError};

    #[test]
    fn kinds_and_codes() {
        let cases: Vec<(BankError, &str)> = vec![
            (
                CredentialError::InvalidInput("name is required".to_string()).into(),
                "validation_error",
            ),
            (CredentialError::DuplicateEmail.into(), "conflict"),
            (CredentialError::InvalidCredentials.into(), "auth_error"),
            (SessionError::Rejected(Rejection::Malformed).into(), "auth_error"),
            (
                TransferError::Forbidden(AccountNumber::from("KB1")).into(),
                "authorization_error",
            ),
            (
                TransferError::UnknownDestination(AccountNumber::from("KB2")).into(),
                "not_found",
            ),
            (TransferError::SameAccount.into(), "validation_error"),
            (
                TransferError::Command(TransferCommandError::NonPositiveAmount {
                    amount: Decimal::ZERO,
                })
                .into(),
                "validation_error",
            ),
            (
                TransferError::Account(AccountError::InsufficientFunds).into(),
                "conflict",
            ),
            (BankError::AccountNotFound(AccountNumber::from("KB3")), "not_found"),
            (
                StoreError::Database(sqlx::Error::PoolTimedOut).into(),
                "storage_error",
            ),
            (
                TransferError::Store(StoreError::Corrupt("bad row".to_string())).into(),
                "storage_error",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.kind().code(), code, "{err}");
        }
    }

    #[test]
    fn public_messages_do_not_leak() {
        let no_credential: BankError = SessionError::Rejected(Rejection::NoCredential).into();
        assert_eq!(no_credential.public_message(), "authentication required");

        for rejection in [
            Rejection::Malformed,
            Rejection::InvalidOrExpired,
            Rejection::UnknownUser,
        ] {
            let err: BankError = SessionError::Rejected(rejection).into();
            assert_eq!(err.public_message(), "invalid credentials");
        }
        let err: BankError = CredentialError::InvalidCredentials.into();
        assert_eq!(err.public_message(), "invalid credentials");

        let err: BankError = StoreError::Corrupt("users row 7".to_string()).into();
        assert_eq!(err.public_message(), "storage unavailable");
        assert!(err.to_string().contains("users row 7"));

        let err: BankError = TransferError::Account(AccountError::InsufficientFunds).into();
        assert_eq!(err.public_message(), "Insufficient funds");
    }
}
