use anyhow::Result;
use tracing::debug;

use sysmate::cli::Cli;
use sysmate::config::Config;
use sysmate::logger;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default();

    let log_file = logger::init(&config.logging, cli.verbose, cli.quiet);
    if let Some(path) = &log_file {
        debug!(path = %path.display(), "logging to file");
    }

    cli.run(&config)
}
