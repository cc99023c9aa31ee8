#![allow(dead_code)]

use std::sync::Mutex;

use bank_ledger::{
    bank::{Bank, Session},
    config::{BankConfig, PasswordPolicy},
    session::Identity,
};
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

pub fn fast_config() -> BankConfig {
    BankConfig {
        password: PasswordPolicy {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
        ..BankConfig::default()
    }
}

/// Same clock as the crate's unit-test double, which `cfg(test)` hides from this crate.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.lock_clock() += delta;
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

pub struct Customer {
    pub identity: Identity,
    pub session: Session,
    pub account: String,
}

/// Registers, logs in and authenticates; `account` is the default account number.
pub async fn customer(bank: &Bank, name: &str) -> Customer {
    let email = format!("{}@example.com", name.to_lowercase());
    let registration = bank
        .register_user(name, &email, "password1")
        .await
        .unwrap();
    let session = bank.login(&email, "password1").await.unwrap();
    let identity = bank
        .authenticate(Some(session.token.expose()))
        .await
        .unwrap();
    Customer {
        identity,
        session,
        account: registration.account.number.to_string(),
    }
}
