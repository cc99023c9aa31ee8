use std::{fs::File, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use bank_ledger::{
    bank::{Bank, BankStores},
    bin_utils::{
        Service,
        csv_printer::{AccountRow, HistoryRow, print_rows},
    },
    config::BankConfig,
    error::BankError,
    session::Identity,
    store::sqlite::{SqliteIdentityStore, SqliteLedgerStore},
};
use clap::{Parser, Subcommand};
use mockable::DefaultClock;
use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "bank-ledger")]
#[command(about = "Accounts, transfers and sessions on SQLite", long_about = None)]
struct Cli {
    /// TOML config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session token returned by `login`
    #[arg(long, env = "BANK_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user and open their default account
    Register {
        name: String,
        email: String,
        password: String,
    },

    /// Start a session and print its token
    Login { email: String, password: String },

    /// End the current session
    Logout,

    /// Show the current user
    Me,

    /// List your accounts
    Accounts,

    /// Open another account
    OpenAccount {
        /// Free-form label, e.g. Savings or Checking
        account_type: String,
        name: String,
    },

    /// Show one of your accounts
    Account { number: String },

    /// Print the balance of one of your accounts
    Balance { number: String },

    /// Move money from one of your accounts to any account
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
        #[arg(long)]
        description: Option<String>,
    },

    /// Submit every row of a CSV file (`from,to,amount,description`) as a transfer
    Batch { file: PathBuf },

    /// List transfers touching any of your accounts, newest first
    History,

    /// Change your password; every session ends
    ChangePassword { current: String, new: String },

    /// Delete expired sessions
    PurgeSessions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = match &cli.config {
        Some(path) => BankConfig::from_file(path)
            .with_context(|| format!("Failed to load `{}`", path.display()))?,
        None => BankConfig::default(),
    }
    .with_env_overrides()?;

    let identity = SqliteIdentityStore::connect(&config.auth_database_url, config.max_connections)
        .await
        .with_context(|| format!("Failed to open `{}`", config.auth_database_url))?;
    let ledger = SqliteLedgerStore::connect(&config.ledger_database_url, config.max_connections)
        .await
        .with_context(|| format!("Failed to open `{}`", config.ledger_database_url))?;

    let bank = Bank::new(
        BankStores::sqlite(identity.clone(), ledger.clone()),
        config,
        Arc::new(DefaultClock),
    )?;
    let result = run(&bank, cli.token.as_deref(), cli.command).await;

    identity.close().await;
    ledger.close().await;
    result
}

/// Only the stable kind and the public message reach the terminal.
fn public(err: BankError) -> anyhow::Error {
    tracing::debug!(%err, "operation failed");
    anyhow::anyhow!("{}: {}", err.kind().code(), err.public_message())
}

async fn authenticate(bank: &Bank, token: Option<&str>) -> Result<Identity> {
    bank.authenticate(token).await.map_err(public)
}

async fn run(bank: &Bank, token: Option<&str>, command: Commands) -> Result<()> {
    let stdout = &mut std::io::stdout();
    match command {
        Commands::Register {
            name,
            email,
            password,
        } => {
            let registration = bank
                .register_user(&name, &email, &password)
                .await
                .map_err(public)?;
            print_rows(stdout, [AccountRow::from(&registration.account)])
        }
        Commands::Login { email, password } => {
            let session = bank.login(&email, &password).await.map_err(public)?;
            println!("{}", session.token.expose());
            Ok(())
        }
        Commands::Logout => bank.logout(token).await.map_err(public),
        Commands::Me => {
            let identity = authenticate(bank, token).await?;
            let user = bank.current_user(&identity).await.map_err(public)?;
            print_rows(stdout, [user])
        }
        Commands::Accounts => {
            let identity = authenticate(bank, token).await?;
            let accounts = bank.list_accounts(&identity).await.map_err(public)?;
            print_rows(stdout, accounts.iter().map(AccountRow::from))
        }
        Commands::OpenAccount { account_type, name } => {
            let identity = authenticate(bank, token).await?;
            let account = bank
                .create_account(&identity, &account_type, &name)
                .await
                .map_err(public)?;
            print_rows(stdout, [AccountRow::from(&account)])
        }
        Commands::Account { number } => {
            let identity = authenticate(bank, token).await?;
            let account = bank
                .get_account(&identity, &number)
                .await
                .map_err(public)?;
            print_rows(stdout, [AccountRow::from(&account)])
        }
        Commands::Balance { number } => {
            let identity = authenticate(bank, token).await?;
            let balance = bank
                .get_balance(&identity, &number)
                .await
                .map_err(public)?;
            println!("{balance}");
            Ok(())
        }
        Commands::Transfer {
            from,
            to,
            amount,
            description,
        } => {
            let identity = authenticate(bank, token).await?;
            let record = bank
                .transfer(&identity, &from, &to, amount, description.as_deref())
                .await
                .map_err(public)?;
            print_rows(stdout, [HistoryRow::from(&record)])
        }
        Commands::Batch { file } => {
            let identity = authenticate(bank, token).await?;
            let input = File::open(&file)
                .with_context(|| format!("Failed to open `{}`", file.display()))?;
            let service = Service {
                bank,
                identity: &identity,
                input,
                output: stdout,
                error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err}")),
            };
            let summary = service.run().await?;
            tracing::info!(settled = summary.settled, failed = summary.failed, "batch done");
            Ok(())
        }
        Commands::History => {
            let identity = authenticate(bank, token).await?;
            let records = bank.list_transactions(&identity).await.map_err(public)?;
            print_rows(stdout, records.iter().map(HistoryRow::from))
        }
        Commands::ChangePassword { current, new } => {
            let identity = authenticate(bank, token).await?;
            bank.change_password(&identity, &current, &new)
                .await
                .map_err(public)
        }
        Commands::PurgeSessions => {
            let purged = bank.purge_expired_sessions().await.map_err(public)?;
            println!("{purged}");
            Ok(())
        }
    }
}
