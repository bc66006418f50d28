//! syshook controller CLI - inspect and change callbacks of a running sandbox

mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::Cli;
use console::style;

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    if let Err(e) = commands::run(&cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}
