use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::{AccountNumber, minor_units};

pub const DEFAULT_DESCRIPTION: &str = "Transfer between accounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferField {
    From,
    To,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferCommandError {
    #[error("Account number is required for {field:?}")]
    AccountRequired { field: TransferField },
    #[error("Amount must be greater than 0, got {amount}")]
    NonPositiveAmount { amount: Decimal },
    #[error("Amount {amount} has more than 2 decimal places or is out of range")]
    UnrepresentableAmount { amount: Decimal },
}

/// A transfer request whose shape has been validated.
/// Ownership, destination existence and solvency are checked later by the engine.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub(crate) from: AccountNumber,
    pub(crate) to: AccountNumber,
    pub(crate) amount: Decimal,
    pub(crate) description: String,
}

impl TransferCommand {
    pub fn parse(
        from: &str,
        to: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Self, TransferCommandError> {
        let amount = Self::parse_amount(amount)?;
        let from = Self::parse_number(from, TransferField::From)?;
        let to = Self::parse_number(to, TransferField::To)?;
        let description = match description.map(str::trim) {
            Some(text) if !text.is_empty() => text.to_owned(),
            _ => DEFAULT_DESCRIPTION.to_owned(),
        };
        Ok(Self {
            from,
            to,
            amount,
            description,
        })
    }

    fn parse_amount(amount: Decimal) -> Result<Decimal, TransferCommandError> {
        if amount <= Decimal::ZERO {
            return Err(TransferCommandError::NonPositiveAmount { amount });
        }
        match minor_units(amount) {
            Some(_) => Ok(amount),
            None => Err(TransferCommandError::UnrepresentableAmount { amount }),
        }
    }

    fn parse_number(
        raw: &str,
        field: TransferField,
    ) -> Result<AccountNumber, TransferCommandError> {
        let number = AccountNumber::from(raw);
        if number.as_str().is_empty() {
            Err(TransferCommandError::AccountRequired { field })
        } else {
            Ok(number)
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    #[test]
    fn parse_valid_command() {
        let cmd =
            TransferCommand::parse(" KB1 ", "KB2", Decimal::new(30050, 2), Some("rent")).unwrap();
        assert_eq!(cmd.from.as_str(), "KB1");
        assert_eq!(cmd.to.as_str(), "KB2");
        assert_eq!(cmd.amount, Decimal::new(30050, 2));
        assert_eq!(cmd.description, "rent");
    }

    #[test]
    fn description_defaults() {
        let amount = Decimal::from_u32(5).unwrap();
        let cmd = TransferCommand::parse("KB1", "KB2", amount, None).unwrap();
        assert_eq!(cmd.description, DEFAULT_DESCRIPTION);
        let cmd = TransferCommand::parse("KB1", "KB2", amount, Some("   ")).unwrap();
        assert_eq!(cmd.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn amount_is_checked_first() {
        let err = TransferCommand::parse("", "", Decimal::ZERO, None).unwrap_err();
        assert_eq!(
            err,
            TransferCommandError::NonPositiveAmount {
                amount: Decimal::ZERO
            }
        );
        assert_eq!(err.to_string(), "Amount must be greater than 0, got 0");

        let err = TransferCommand::parse("KB1", "KB2", Decimal::new(-1, 0), None).unwrap_err();
        assert!(matches!(err, TransferCommandError::NonPositiveAmount { .. }));

        let err = TransferCommand::parse("KB1", "KB2", Decimal::new(1, 3), None).unwrap_err();
        assert!(matches!(
            err,
            TransferCommandError::UnrepresentableAmount { .. }
        ));
    }

    #[test]
    fn account_numbers_required() {
        let amount = Decimal::from_u32(5).unwrap();
        let err = TransferCommand::parse("  ", "KB2", amount, None).unwrap_err();
        assert_eq!(
            err,
            TransferCommandError::AccountRequired {
                field: TransferField::From
            }
        );
        let err = TransferCommand::parse("KB1", "", amount, None).unwrap_err();
        assert_eq!(
            err,
            TransferCommandError::AccountRequired {
                field: TransferField::To
            }
        );
    }
}
