use clap::Parser;
use log::{error, info};
use bandlink::cli::Cli;
use bandlink::error::{AppRunError, ConfigError};
use bandlink::{init_logging, run};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();

    init_logging(cli.log_level())?;
    info!(concat!("bandlink ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another monitor is already using this config file");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
