use std::path::PathBuf;
use std::time::Duration;
use clap::{ArgAction, Parser, Subcommand};

use crate::config::types::Config;
use crate::device::constants::{MIN_TIMEOUT, SEARCH_AND_CONNECT_DURATION};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Client for a remote band engine: tracks band state, forwards events and sends commands", long_about = None)]
pub struct Cli {
    /// Read settings from this config file instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Address of the engine's event publisher, e.g. tcp://192.168.100.100:9999
    #[arg(long, value_name = "ADDRESS", global = true)]
    pub publisher: Option<String>,

    /// Address of the engine's request socket, e.g. tcp://192.168.100.100:9998
    #[arg(long, value_name = "ADDRESS", global = true)]
    pub rpc: Option<String>,

    /// Keep this band in the band set even while the engine does not report it
    #[arg(long = "favorite", value_name = "BAND", action = ArgAction::Append, global = true)]
    pub favorites: Vec<String>,

    /// How long without engine traffic before the engine is considered lost (e.g. "3s")
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout, global = true)]
    pub heartbeat_timeout: Option<Duration>,

    /// Log wire traffic
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Track the engine and log every session event until Ctrl-C
    Monitor,
    /// Print the name of every gesture published by the engine
    Gestures,
    /// Print the engine's version
    Version,
    /// Search for a band and connect it when it shows up
    SearchConnect {
        band: String,

        /// Search duration in seconds
        #[arg(long, default_value_t = SEARCH_AND_CONNECT_DURATION)]
        duration: u64,
    },
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let timeout = humantime::parse_duration(value).map_err(|err| err.to_string())?;
    if timeout < Duration::from_millis(MIN_TIMEOUT) {
        return Err(format!("must be at least {}ms", MIN_TIMEOUT));
    }
    Ok(timeout)
}

impl Cli {
    pub fn selected_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Monitor)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }

    /// Overrides the settings read from the config file with the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(publisher) = &self.publisher {
            config.publisher_address = publisher.clone();
        }
        if let Some(rpc) = &self.rpc {
            config.rpc_address = rpc.clone();
        }
        if let Some(timeout) = self.heartbeat_timeout {
            config.heartbeat_timeout_ms = timeout.as_millis() as u64;
        }
        config.add_favorites(&self.favorites);
    }
}
