/// Account model and balance management.
/// Balances change only by applying events produced by handling a debit or credit.
pub mod account;

/// Parse raw transfer input into a validated [`command::TransferCommand`].
pub mod command;

/// Users, email normalisation and password hashing.
pub mod credential;

/// Opaque session tokens: generation, structural checks and at-rest digests.
pub mod token;

/// Turns a presented credential into an authenticated [`session::Identity`].
pub mod session;

/// Settled transfer records.
pub mod ledger;

/// Persistence ports plus the in-memory and SQLite adapters.
pub mod store;

/// The transfer engine. Validates a transfer and hands it to the store for atomic settlement.
pub mod transfer;

/// Facade that wires every component together and exposes the caller-facing operations.
pub mod bank;

/// Caller-facing error taxonomy.
pub mod error;

/// Runtime configuration.
pub mod config;

/// Helpers for the command line binary: CSV batch input and CSV output.
/// Kept in the library so integration tests can drive them.
pub mod bin_utils;

#[cfg(test)]
pub(crate) mod test_support;
