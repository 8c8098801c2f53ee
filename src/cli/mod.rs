pub mod accounts;
pub mod batch;
pub mod init;
pub mod review;
pub mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tally", about = "Bank-statement import and reconciliation with staged review.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up tally: choose a data directory and initialize the database.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage ledger accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Stage statement files as import batches.
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// Review staged rows and commit them into the ledger.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Show batches grouped by status.
    Status,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Itau Checking'
        name: String,
        /// Institution name
        #[arg(long)]
        institution: Option<String>,
        /// Currency code (default: BRL)
        #[arg(long)]
        currency: Option<String>,
    },
    /// List accounts with current balances.
    List,
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Register a statement file as a new pending batch.
    Create {
        /// Path to the CSV or OFX statement file
        file: String,
        /// Account name the statement belongs to
        #[arg(long)]
        account: String,
        /// Force the file format: csv or ofx (default: by extension)
        #[arg(long = "file-type")]
        file_type: Option<String>,
        /// IANA timezone for statement dates (default: America/Sao_Paulo)
        #[arg(long)]
        timezone: Option<String>,
        /// Default cost center id applied to rows without their own hint
        #[arg(long = "cost-center-id")]
        cost_center_id: Option<i64>,
        /// Category prefix hint carried on every normalized row
        #[arg(long = "category-prefix")]
        category_prefix: Option<String>,
    },
    /// Parse the statement file and stage its rows for review.
    Process {
        /// Batch id
        batch_id: i64,
    },
    /// Show one batch: counters, status, and recent events.
    Show {
        /// Batch id
        batch_id: i64,
    },
    /// List staged rows of a batch.
    Rows {
        /// Batch id
        batch_id: i64,
        /// Filter by row status: valid, invalid, imported, skipped, error
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows to print
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Commit eligible staged rows into the ledger.
    Import {
        /// Batch id
        batch_id: i64,
        /// Comma-separated row ids to import (default: all eligible)
        #[arg(long)]
        rows: Option<String>,
        /// Commit even when the ledger already holds the same checksum
        #[arg(long = "override-duplicates")]
        override_duplicates: bool,
    },
    /// Mark one staged row as skipped.
    Skip {
        /// Batch id
        batch_id: i64,
        /// Row id
        row_id: i64,
        /// Reason recorded on the row
        #[arg(long)]
        reason: Option<String>,
    },
}
