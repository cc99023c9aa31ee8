use std::io::Write;

use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    account::{Account, AccountNumber},
    ledger::{TransferKind, TransferRecord},
};

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub number: AccountNumber,
    pub account_type: String,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        Self {
            number: account.number.clone(),
            account_type: account.account_type.clone(),
            name: account.display_name.clone(),
            balance: account.balance,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub from: AccountNumber,
    pub to: AccountNumber,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<&TransferRecord> for HistoryRow {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id,
            from: record.from.clone(),
            to: record.to.clone(),
            amount: record.amount,
            kind: record.kind,
            description: record.description.clone(),
            created_at: record.created_at,
        }
    }
}

pub fn print_rows<W, T>(output: &mut W, rows: impl IntoIterator<Item = T>) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_header_and_rows() {
        let record = TransferRecord {
            id: 7,
            from: "KB1".into(),
            to: "KB2".into(),
            amount: Decimal::new(30000, 2),
            kind: TransferKind::Transfer,
            description: "rent".to_string(),
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let mut out = Vec::new();
        print_rows(&mut out, [HistoryRow::from(&record)]).unwrap();
        let out = String::from_utf8(out).unwrap();
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("id,from,to,amount,type,description,created_at")
        );
        assert_eq!(
            lines.next(),
            Some("7,KB1,KB2,300.00,Transfer,rent,1970-01-01T00:00:00Z")
        );
        assert_eq!(lines.next(), None);
    }
}
