//! Glue between [`crate::bank::Bank`] and the command line: a CSV batch of
//! transfers in, CSV listings out.

use std::io::{Read, Write};

use anyhow::Result;
use csv_parser::CsvTransferParser;
use csv_printer::{HistoryRow, print_rows};
use thiserror::Error;

use crate::{bank::Bank, error::BankError, session::Identity};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error("{}", .0.public_message())]
    Bank(#[from] BankError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub settled: usize,
    pub failed: usize,
}

/// Submits every row of `input` as an independent transfer of `identity`.
/// A failing row is handed to `error_printer` and the batch continues.
/// Settled transfers are written to `output` as CSV.
pub struct Service<'a, R, W: 'a> {
    pub bank: &'a Bank,
    pub identity: &'a Identity,
    pub input: R,
    pub output: &'a mut W,
    pub error_printer: Box<dyn FnMut(u64, BatchError) + 'a>,
}

impl<'a, R, W> Service<'a, R, W>
where
    R: Read,
    W: Write + 'a,
{
    pub async fn run(mut self) -> Result<BatchSummary> {
        let parser = CsvTransferParser::new(self.input);
        let mut summary = BatchSummary::default();
        let mut settled = Vec::new();

        for (line, row) in parser {
            let result = match row {
                Ok(row) => self
                    .bank
                    .transfer(
                        self.identity,
                        &row.from,
                        &row.to,
                        row.amount,
                        row.description.as_deref(),
                    )
                    .await
                    .map_err(BatchError::from),
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(record) => {
                    summary.settled += 1;
                    settled.push(record);
                }
                Err(err) => {
                    summary.failed += 1;
                    (self.error_printer)(line, err);
                }
            }
        }

        print_rows(self.output, settled.iter().map(HistoryRow::from))?;
        Ok(summary)
    }
}
