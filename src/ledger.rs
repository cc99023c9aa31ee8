use std::{collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::AccountNumber;

pub type TransferId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Transfer,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "Transfer",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Transfer" => Ok(Self::Transfer),
            other => Err(format!("unknown transfer kind `{other}`")),
        }
    }
}

/// A movement of funds that has been validated but not yet settled.
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub from: AccountNumber,
    pub to: AccountNumber,
    pub amount: Decimal,
    pub kind: TransferKind,
    pub description: String,
    pub requested_at: DateTime<Utc>,
}

/// Immutable proof that both balance mutations of a transfer happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub from: AccountNumber,
    pub to: AccountNumber,
    pub amount: Decimal,
    pub kind: TransferKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn settled(id: TransferId, pending: PendingTransfer) -> Self {
        Self {
            id,
            from: pending.from,
            to: pending.to,
            amount: pending.amount,
            kind: pending.kind,
            description: pending.description,
            created_at: pending.requested_at,
        }
    }

    pub fn involves(&self, numbers: &HashSet<&AccountNumber>) -> bool {
        numbers.contains(&self.from) || numbers.contains(&self.to)
    }
}

/// Newest first; ids break ties between records created in the same instant.
pub fn newest_first(records: &mut [TransferRecord]) {
    records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn record(id: TransferId, from: &str, to: &str, created_at: DateTime<Utc>) -> TransferRecord {
        TransferRecord {
            id,
            from: from.into(),
            to: to.into(),
            amount: Decimal::ONE,
            kind: TransferKind::Transfer,
            description: String::new(),
            created_at,
        }
    }

    #[test]
    fn involves_either_side() {
        let now = Utc::now();
        let a = AccountNumber::from("KB1");
        let numbers = HashSet::from([&a]);
        assert!(record(1, "KB1", "KB2", now).involves(&numbers));
        assert!(record(2, "KB2", "KB1", now).involves(&numbers));
        assert!(!record(3, "KB2", "KB3", now).involves(&numbers));
    }

    #[test]
    fn ordering() {
        let now = Utc::now();
        let mut records = vec![
            record(1, "KB1", "KB2", now - TimeDelta::seconds(1)),
            record(2, "KB1", "KB2", now),
            record(3, "KB1", "KB2", now),
        ];
        newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn kind_round_trips_through_text() {
        assert_eq!(
            TransferKind::Transfer.as_str().parse::<TransferKind>(),
            Ok(TransferKind::Transfer)
        );
        assert!("Deposit".parse::<TransferKind>().is_err());
    }
}
