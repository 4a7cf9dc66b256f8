//! camldbg - drive the OCaml bytecode debugger from the command line
//!
//! A background daemon keeps one ocamldebug session alive between
//! invocations; each `camldbg` command talks to it over a local socket.

use camldbg::common::logging;
use camldbg::{cli, commands, daemon};
use clap::Parser;
use commands::Commands;

#[derive(Parser)]
#[command(name = "camldbg", about = "Session controller and CLI for ocamldebug")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        // the daemon sets up its own file logging
        Commands::Daemon => daemon::run().await,
        command => {
            logging::init_cli();
            cli::dispatch(command).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
