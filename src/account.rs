use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::UserId;

pub type AccountId = i64;

/// Balances and amounts carry at most this many decimal places.
pub const MONEY_SCALE: u32 = 2;

const NUMBER_PREFIX: &str = "KB";
const NUMBER_SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Converts an amount into integer minor units (cents).
/// Returns `None` when the amount has more than [`MONEY_SCALE`] decimal places
/// or does not fit into `i64`.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    let scaled = amount.checked_mul(Decimal::ONE_HUNDRED)?;
    if !scaled.fract().is_zero() {
        return None;
    }
    scaled.to_i64()
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MONEY_SCALE)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(String);

impl AccountNumber {
    /// `KB` + creation time in milliseconds + 9 random base-36 characters.
    /// Generation is only probabilistically unique; stores enforce uniqueness.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..NUMBER_SUFFIX_LEN)
            .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
            .collect();
        Self(format!("{NUMBER_PREFIX}{}{suffix}", now.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountNumber {
    fn from(value: &str) -> Self {
        Self(value.trim().to_owned())
    }
}

impl From<String> for AccountNumber {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccountEventKind {
    Debited,
    Credited,
}

#[derive(Debug)]
pub struct AccountEvent {
    amount: Decimal,
    kind: AccountEventKind,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("Balance would overflow")]
    BalanceOverflow,
}

/// Everything needed to open an account except the number and id, which the store assigns.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner: UserId,
    pub account_type: String,
    pub display_name: String,
    pub opening_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub number: AccountNumber,
    pub account_type: String,
    pub display_name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn open(id: AccountId, number: AccountNumber, new: NewAccount, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: new.owner,
            number,
            account_type: new.account_type,
            display_name: new.display_name,
            balance: new.opening_balance,
            created_at: now,
        }
    }

    pub fn apply(&mut self, event: &AccountEvent) {
        match event.kind {
            AccountEventKind::Debited => {
                self.balance -= event.amount;
            }
            AccountEventKind::Credited => {
                self.balance += event.amount;
            }
        }
    }

    pub fn handle_debit(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        if self.balance >= amount {
            Ok(AccountEvent {
                amount,
                kind: AccountEventKind::Debited,
            })
        } else {
            Err(AccountError::InsufficientFunds)
        }
    }

    pub fn handle_credit(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        // minor units must stay representable for the SQLite adapter
        match self.balance.checked_add(amount).and_then(minor_units) {
            Some(_) => Ok(AccountEvent {
                amount,
                kind: AccountEventKind::Credited,
            }),
            None => Err(AccountError::BalanceOverflow),
        }
    }
}
