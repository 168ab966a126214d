// flowtest
// Command line runner for dependency-aware API test suites

mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use commands::run::RunArgs;
use commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "flowtest", version, about = "Run declarative API test suites")]
struct Cli {
    /// Log engine internals at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover, order and execute suites
    Run(RunArgs),
    /// Parse suites and check their dependency graph without sending requests
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
    }
}
