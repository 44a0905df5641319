mod cli;
mod core;
mod platform;
mod util;

use std::io::IsTerminal;
use std::process;

use tracing_subscriber::EnvFilter;

fn main() {
    let args = cli::parse();
    init_logging(&args.log_level);

    if let Err(e) = cli::commands::dispatch(args) {
        util::report_fatal(&e);
        process::exit(1);
    }
}

/// Log to stderr so stdout stays free for the plan output.
fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}
