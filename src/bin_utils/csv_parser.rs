use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

/// One requested transfer of a batch file: `from,to,amount,description`.
#[derive(Debug, Deserialize)]
pub struct TransferRow {
    pub from: String,
    pub to: String,
    /// Parsed from the text, never through a float.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub description: Option<String>,
}

/// Parses a transfer batch in CSV format.
/// Yields the line number with each row so failures can be reported per line.
pub struct CsvTransferParser<R> {
    iter: DeserializeRecordsIntoIter<R, TransferRow>,
}

impl<R> CsvTransferParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvTransferParser<R>
where
    R: Read,
{
    type Item = (u64, Result<TransferRow, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
