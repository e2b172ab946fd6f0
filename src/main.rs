use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokenpay::application::checkout::{Checkout, CheckoutRequest};
use tokenpay::application::engine::{PaymentEngine, PaymentSubmission};
use tokenpay::application::retry::RetryPolicy;
use tokenpay::application::scheduler::ExpirationScheduler;
use tokenpay::config::{DEFAULT_ISSUER_PATH, EngineConfig, IssuerHttpConfig};
use tokenpay::domain::money::{Amount, CurrencyCode};
use tokenpay::domain::ports::{AccountDirectoryRef, LedgerStore, PaymentStoreRef, TransactionStore};
use tokenpay::domain::token::EncodedToken;
use tokenpay::domain::transaction::{AcceptableIssuers, TransactionId};
use tokenpay::infrastructure::in_memory::{InMemoryAccountDirectory, InMemoryStore};
use tokenpay::infrastructure::issuer_http::HttpIssuerClient;
use tokenpay::interfaces::csv::ledger_writer::LedgerWriter;
use tokenpay::logging::{LogFormat, init_logging};
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "TOKENPAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// JSON file with the merchant account settings.
    #[arg(long, global = true, env = "TOKENPAY_ACCOUNTS")]
    accounts: Option<PathBuf>,

    #[arg(long, global = true, env = "TOKENPAY_ISSUER_SCHEME", default_value = "https")]
    issuer_scheme: String,

    #[arg(long, global = true, env = "TOKENPAY_ISSUER_PATH", default_value = DEFAULT_ISSUER_PATH)]
    issuer_path: String,

    /// Timeout for a single issuer call, in milliseconds.
    #[arg(long, global = true, env = "TOKENPAY_ISSUER_TIMEOUT_MS", default_value_t = 30_000)]
    issuer_timeout_ms: u64,

    #[arg(long, global = true, env = "TOKENPAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a new payment transaction for a merchant account.
    Create {
        #[arg(long)]
        account: String,
        #[arg(long)]
        value: String,
        #[arg(long)]
        currency: Option<String>,
        /// Lifetime in seconds; defaults to the account setting.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Accepted issuer domain, repeatable. `*` accepts any issuer.
        #[arg(long = "issuer")]
        issuers: Vec<String>,
        #[arg(long)]
        order_id: Option<String>,
        #[arg(long)]
        seller: Option<Url>,
        #[arg(long)]
        return_url: Option<Url>,
        #[arg(long)]
        callback_url: Option<Url>,
    },
    /// Pay a transaction with one or more encoded tokens.
    Pay {
        id: TransactionId,
        #[arg(long = "token", required = true)]
        tokens: Vec<String>,
        #[arg(long)]
        wallet_id: Option<String>,
        #[arg(long)]
        memo: Option<String>,
        #[arg(long)]
        client_type: Option<String>,
    },
    /// Print a transaction as JSON.
    Show { id: TransactionId },
    /// Write the settlement ledger as CSV.
    Ledger,
    /// Expire every overdue unpaid transaction.
    Sweep,
}

fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreRef> {
    match db_path {
        Some(path) => {
            #[cfg(feature = "storage-rocksdb")]
            {
                let store = tokenpay::infrastructure::rocksdb::RocksDBStore::open(path)
                    .into_diagnostic()?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "storage-rocksdb"))]
            {
                let _ = path;
                eprintln!(
                    "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
                );
                Ok(Arc::new(InMemoryStore::new()))
            }
        }
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

fn open_directory(accounts: Option<PathBuf>) -> Result<AccountDirectoryRef> {
    let directory = match accounts {
        Some(path) => {
            let json = std::fs::read_to_string(&path).into_diagnostic()?;
            InMemoryAccountDirectory::from_json(&json).into_diagnostic()?
        }
        None => InMemoryAccountDirectory::new(),
    };
    Ok(Arc::new(directory))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("info", cli.log_format);

    let persistent = cli.db_path.is_some();
    let store = open_store(cli.db_path)?;
    let retry = RetryPolicy::default();
    let scheduler = Arc::new(ExpirationScheduler::new(store.clone(), retry));
    if persistent {
        scheduler.restore().await.into_diagnostic()?;
    }

    match cli.command {
        Command::Create {
            account,
            value,
            currency,
            timeout_secs,
            issuers,
            order_id,
            seller,
            return_url,
            callback_url,
        } => {
            let directory = open_directory(cli.accounts)?;
            let acceptable_issuers = if issuers.is_empty() {
                None
            } else {
                Some(AcceptableIssuers::parse(&issuers).into_diagnostic()?)
            };
            let request = CheckoutRequest {
                account,
                value: Amount::parse(&value).into_diagnostic()?,
                currency: currency
                    .map(|c| CurrencyCode::parse(&c))
                    .transpose()
                    .into_diagnostic()?,
                timeout_secs,
                acceptable_issuers,
                order_id,
                seller,
                return_url,
                callback_url,
                ..Default::default()
            };
            let checkout = Checkout::new(directory, store, scheduler.clone()).with_retry(retry);
            let created = checkout.create(request).await.into_diagnostic()?;
            print_json(&created)?;
        }
        Command::Pay {
            id,
            tokens,
            wallet_id,
            memo,
            client_type,
        } => {
            let timeout = Duration::from_millis(cli.issuer_timeout_ms);
            let http = IssuerHttpConfig::default()
                .with_scheme(cli.issuer_scheme)
                .with_path(cli.issuer_path)
                .with_timeout(timeout);
            let issuer = Arc::new(HttpIssuerClient::new(http).into_diagnostic()?);
            let config = EngineConfig::default()
                .with_issuer_timeout(timeout)
                .with_retry(retry);
            let engine = PaymentEngine::with_config(store, issuer, config);

            let submission = PaymentSubmission {
                tokens: tokens.into_iter().map(EncodedToken::new).collect(),
                wallet_id,
                memo,
                client_type,
            };
            let ack = engine.respond(&id, submission).await;
            print_json(&ack)?;
            if !ack.is_ok() {
                return Err(miette!("payment of {id} failed: {}", ack.status));
            }
        }
        Command::Show { id } => {
            let tx = store
                .find(&id)
                .await
                .into_diagnostic()?
                .ok_or_else(|| miette!("transaction {id} not found"))?;
            print_json(&tx)?;
        }
        Command::Ledger => {
            let entries = store.entries().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = LedgerWriter::new(stdout.lock());
            writer.write_entries(entries).into_diagnostic()?;
        }
        Command::Sweep => {
            let expired = scheduler.sweep_overdue().await.into_diagnostic()?;
            println!("{expired}");
        }
    }

    scheduler.shutdown();
    Ok(())
}
