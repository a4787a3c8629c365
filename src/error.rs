use std::any::Any;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unsupported transport address: {address}")]
    UnsupportedAddress { address: String },

    #[error("Transport I/O failure: {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed event payload: {source}")]
    Json { #[from] source: serde_json::Error },

    #[error("Event of type {event_type} is missing its parameters")]
    MissingParameters { event_type: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The session task is no longer running")]
    Closed,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (logging): {source}")]
    Logging { #[from] source: fern::InitError },

    #[error("Failed to start application (runtime): {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Session failure: {source}")]
    Session { #[from] source: SessionError },
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from task: [{}]", stringified)
}
