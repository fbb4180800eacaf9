//! metaschema diagnostic CLI
//!
//! Usage:
//!   metaschema --database app.db audit
//!   metaschema --database app.db audit --apply
//!   metaschema --database app.db plan Invoice
//!
//! `audit` exits non-zero when problems remain.

use anyhow::Result;
use clap::Parser;
use metaschema_cli::{Cli, run};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let output = run(&cli)?;
    println!("{}", output.text);
    Ok(if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
