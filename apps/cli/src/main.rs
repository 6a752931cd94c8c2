//! imagefield CLI — reconcile multi-valued image fields on stored items.
//!
//! Creates items, submits image field values (stored records, upload
//! references, data URIs, remote URLs), and commits the reconciled result.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
