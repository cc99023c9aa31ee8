use std::sync::Arc;

use mockable::Clock;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    account::{AccountError, AccountNumber},
    command::{TransferCommand, TransferCommandError},
    ledger::{PendingTransfer, TransferKind, TransferRecord},
    session::Identity,
    store::{AccountStore, Ledger, StoreError},
};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Command(#[from] TransferCommandError),
    #[error("Account {0} is not owned by the caller")]
    Forbidden(AccountNumber),
    #[error("Destination account {0} does not exist")]
    UnknownDestination(AccountNumber),
    #[error("Source and destination are the same account")]
    SameAccount,
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Moves funds between accounts.
///
/// Checks run in a fixed order, each with its own error: amount (while parsing
/// the command), source ownership, destination existence, distinct accounts,
/// solvency. Settlement itself is delegated to [`Ledger::settle`], which
/// repeats the solvency check atomically with the debit.
#[derive(Clone)]
pub struct TransferEngine {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl TransferEngine {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            clock,
        }
    }

    pub async fn transfer(
        &self,
        identity: &Identity,
        command: TransferCommand,
    ) -> Result<TransferRecord, TransferError> {
        let user_id = identity.user_id();
        let result = self.execute(identity, command).await;
        match &result {
            Ok(record) => info!(
                %user_id,
                transfer_id = record.id,
                from = %record.from,
                to = %record.to,
                amount = %record.amount,
                "transfer settled"
            ),
            Err(TransferError::Store(err)) => error!(%user_id, %err, "transfer failed"),
            Err(err) => warn!(%user_id, %err, "transfer rejected"),
        }
        result
    }

    async fn execute(
        &self,
        identity: &Identity,
        command: TransferCommand,
    ) -> Result<TransferRecord, TransferError> {
        let TransferCommand {
            from,
            to,
            amount,
            description,
        } = command;

        let Some(source) = self
            .accounts
            .get_by_number(&from, Some(identity.user_id()))
            .await?
        else {
            return Err(TransferError::Forbidden(from));
        };
        let Some(destination) = self.accounts.get_by_number(&to, None).await? else {
            return Err(TransferError::UnknownDestination(to));
        };
        if source.number == destination.number {
            return Err(TransferError::SameAccount);
        }
        // fast failure on the snapshot; settle decides for real
        source.handle_debit(amount)?;

        let pending = PendingTransfer {
            from,
            to,
            amount,
            kind: TransferKind::Transfer,
            description,
            requested_at: self.clock.utc(),
        };
        self.ledger
            .settle(pending)
            .await
            .map_err(|err| match err {
                StoreError::Account(err) => TransferError::Account(err),
                // accounts are never deleted, so only the destination can be missing here
                StoreError::NotFound => TransferError::UnknownDestination(destination.number),
                err => TransferError::Store(err),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::{Decimal, prelude::FromPrimitive};

    use super::*;
    use crate::{
        account::{Account, NewAccount},
        credential::{User, UserId},
        store::memory::InMemoryLedgerStore,
    };

    fn identity(id: i64) -> Identity {
        Identity::new(User {
            id: UserId(id),
            name: format!("user {id}"),
            email: format!("user{id}@example.com"),
            created_at: Utc::now(),
        })
    }

    fn dec(value: u32) -> Decimal {
        Decimal::from_u32(value).unwrap()
    }

    async fn setup() -> (Arc<InMemoryLedgerStore>, TransferEngine, Account, Account) {
        let store = Arc::new(InMemoryLedgerStore::default());
        let engine = TransferEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(mockable::DefaultClock),
        );
        let open = |owner| NewAccount {
            owner: UserId(owner),
            account_type: "Savings".to_owned(),
            display_name: "Main".to_owned(),
            opening_balance: dec(1000),
        };
        let a = store.create(open(1), Utc::now()).await.unwrap();
        let b = store.create(open(2), Utc::now()).await.unwrap();
        (store, engine, a, b)
    }

    async fn balance(store: &InMemoryLedgerStore, account: &Account) -> Decimal {
        store
            .get_by_number(&account.number, None)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    fn command(from: &Account, to: &Account, amount: Decimal) -> TransferCommand {
        TransferCommand::parse(from.number.as_str(), to.number.as_str(), amount, None).unwrap()
    }

    #[tokio::test]
    async fn transfer_to_another_user() {
        let (store, engine, a, b) = setup().await;
        let record = engine
            .transfer(&identity(1), command(&a, &b, dec(300)))
            .await
            .unwrap();
        assert_eq!(record.from, a.number);
        assert_eq!(record.to, b.number);
        assert_eq!(record.amount, dec(300));
        assert_eq!(record.description, "Transfer between accounts");
        assert_eq!(balance(&store, &a).await, dec(700));
        assert_eq!(balance(&store, &b).await, dec(1300));

        let err = engine
            .transfer(&identity(1), command(&a, &b, dec(800)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Account(AccountError::InsufficientFunds)
        ));
        assert_eq!(balance(&store, &a).await, dec(700));
        assert_eq!(balance(&store, &b).await, dec(1300));
        assert_eq!(store.list_involving(&[a.number]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checks_run_in_order() {
        let (store, engine, a, b) = setup().await;
        let missing = AccountNumber::from("KB0");

        // foreign source wins over an unknown destination
        let cmd = TransferCommand::parse(b.number.as_str(), "KB0", dec(5000), None).unwrap();
        let err = engine.transfer(&identity(1), cmd).await.unwrap_err();
        assert!(matches!(err, TransferError::Forbidden(n) if n == b.number));

        let cmd = TransferCommand::parse(a.number.as_str(), "KB0", dec(5000), None).unwrap();
        let err = engine.transfer(&identity(1), cmd).await.unwrap_err();
        assert!(matches!(err, TransferError::UnknownDestination(n) if n == missing));

        let err = engine
            .transfer(&identity(1), command(&a, &a, dec(5000)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameAccount));

        assert!(store.list_involving(&[a.number, b.number]).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_transfers_do_not_deadlock() {
        let (store, engine, a, b) = setup().await;
        let mut handles = Vec::new();
        for i in 0..50 {
            let engine = engine.clone();
            let (from, to, user) = if i % 2 == 0 { (&a, &b, 1) } else { (&b, &a, 2) };
            let cmd = command(from, to, dec(10));
            handles.push(tokio::spawn(async move {
                engine.transfer(&identity(user), cmd).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(balance(&store, &a).await, dec(1000));
        assert_eq!(balance(&store, &b).await, dec(1000));
        assert_eq!(store.list_involving(&[a.number]).await.unwrap().len(), 50);
    }
}
