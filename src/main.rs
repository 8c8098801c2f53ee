mod cli;
mod db;
mod error;
mod fmt;
mod ledger;
mod models;
mod normalizer;
mod processor;
mod reader;
mod review;
mod settings;
mod store;

use clap::Parser;

use cli::{AccountsCommands, BatchCommands, Cli, Commands, ReviewCommands};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                institution,
                currency,
            } => cli::accounts::add(&name, institution.as_deref(), currency.as_deref()),
            AccountsCommands::List => cli::accounts::list(),
        },
        Commands::Batch { command } => match command {
            BatchCommands::Create {
                file,
                account,
                file_type,
                timezone,
                cost_center_id,
                category_prefix,
            } => cli::batch::create(
                &file,
                &account,
                file_type.as_deref(),
                timezone.as_deref(),
                cost_center_id,
                category_prefix.as_deref(),
            ),
            BatchCommands::Process { batch_id } => cli::batch::process(batch_id),
            BatchCommands::Show { batch_id } => cli::batch::show(batch_id),
            BatchCommands::Rows {
                batch_id,
                status,
                limit,
            } => cli::batch::rows(batch_id, status.as_deref(), limit),
        },
        Commands::Review { command } => match command {
            ReviewCommands::Import {
                batch_id,
                rows,
                override_duplicates,
            } => cli::review::import(batch_id, rows.as_deref(), override_duplicates),
            ReviewCommands::Skip {
                batch_id,
                row_id,
                reason,
            } => cli::review::skip(batch_id, row_id, reason.as_deref()),
        },
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
