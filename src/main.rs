//! Main entry point for credvault.

use clap::Parser;
use credvault::cli::Cli;
use credvault::utils::error_exit;
use tracing_subscriber::EnvFilter;

fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.execute() {
        error_exit(&format!("{e:#}"), 1);
    }
}

/// Logs go to stderr so command output stays clean. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "credvault=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
