//! tapestry CLI - synthesis worker lifecycle controller を
//! インメモリのストアで動かすシミュレータ

mod logging;
mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "tapestry", about = "Synthesis worker lifecycle controller")]
struct Cli {
    /// Log output format (logs go to stderr).
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Drive compositions through synthesis against an in-memory store and
    /// print a JSON summary.
    Simulate(simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match cli.command {
        Commands::Simulate(args) => {
            let summary = simulate::run(args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
