//! fastnav CLI entrypoint

use clap::Parser;

use fastnav::cli::Cli;
use fastnav::output;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.execute() {
        output::error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}
