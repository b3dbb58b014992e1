mod cli;
mod execute;

use clap::Parser;
use toolrig::logging::init_logging;
use crate::cli::CLI;
use anyhow::Result;

fn main() -> Result<()> {
    let cli = CLI::parse();
    init_logging(cli.options.log_level.as_deref());
    let code = execute::execute(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
