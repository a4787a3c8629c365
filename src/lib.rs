use std::env;
use std::sync::Arc;
use futures::channel::mpsc::unbounded;
use futures::StreamExt;
use log::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::engine::events::{decode_event, EngineEvent};
use crate::engine::handle::spawn_session;
use crate::engine::requests::{version_string, EngineRequest};
use crate::engine::rpc::RpcChannel;
use crate::engine::subscriber::EventSubscriber;
use crate::engine::types::SessionEvent;
use crate::error::AppRunError;
use crate::transport::tcp::TcpTransport;
use crate::transport::Transport;

pub mod cli;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod transport;

pub fn init_logging(level: log::LevelFilter) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(cli.config.as_deref())?;
    let mut config = config_io.read().await?;
    cli.apply(&mut config);

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport);

    match cli.selected_command() {
        Commands::Monitor => {
            let mut config_locker = config_io.locker()?;
            let _lock_guard = config_locker.lock()?;
            monitor(transport, &config).await
        },
        Commands::Gestures => gestures(transport, &config).await,
        Commands::Version => version(transport, &config).await,
        Commands::SearchConnect { band, duration } => search_connect(transport, &config, &band, duration).await,
    }
}

async fn monitor(transport: Arc<dyn Transport>, config: &Config) -> Result<(), AppRunError> {
    info!("Monitoring engine at {} / {}", config.publisher_address, config.rpc_address);

    let (handle, task) = spawn_session(transport, config);
    let mut events = handle.subscribe().await?;

    'mainloop: loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted, stopping");
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(event) => info!("{:?}", event),
            },
        }
    }

    handle.stop().await?;
    if let Err(err) = task.await {
        warn!("Session task failed: {}", err);
    }
    Ok(())
}

async fn gestures(transport: Arc<dyn Transport>, config: &Config) -> Result<(), AppRunError> {
    let (sender, mut messages) = unbounded();
    let mut subscriber = EventSubscriber::start(transport, &config.publisher_address, sender);

    'mainloop: loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break 'mainloop;
            },
            message = messages.next() => match message {
                None => break 'mainloop,
                Some(message) => match decode_event(&message) {
                    Ok(Some(EngineEvent::Gesture(gesture))) => println!("{}", gesture.name),
                    Ok(_) => {},
                    Err(err) => warn!("Dropping malformed event: {}", err),
                },
            },
        }
    }

    subscriber.stop().await;
    Ok(())
}

async fn version(transport: Arc<dyn Transport>, config: &Config) -> Result<(), AppRunError> {
    let mut rpc = RpcChannel::new(transport, config.request_timeout());
    rpc.change_address(&config.rpc_address);

    let request = EngineRequest::GetVersion;
    match rpc.send(request.method(), request.params()).await.as_ref().and_then(version_string) {
        Some(version) => println!("{}", version),
        None => warn!("The engine at {} did not report its version", config.rpc_address),
    }

    rpc.close();
    Ok(())
}

async fn search_connect(transport: Arc<dyn Transport>, config: &Config, band: &str, seconds: u64) -> Result<(), AppRunError> {
    let (handle, task) = spawn_session(transport, config);
    let mut events = handle.subscribe().await?;
    let mut started = false;

    if handle.is_bound().await? {
        handle.search_and_connect(band, seconds).await?;
        started = true;
    } else {
        info!("Waiting for the engine at {}", config.publisher_address);
    }

    'mainloop: loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break 'mainloop;
            },
            event = events.next() => match event {
                None => break 'mainloop,
                Some(SessionEvent::Bound(true)) if !started => {
                    handle.search_and_connect(band, seconds).await?;
                    started = true;
                },
                Some(SessionEvent::BandFound { address, rssi }) => {
                    info!("Found {} ({}dBm)", address, rssi);
                },
                Some(SessionEvent::SearchAndConnectFinished { band, found }) => {
                    if found {
                        println!("{} found, connect requested", band);
                    } else {
                        println!("{} not found", band);
                    }
                    break 'mainloop;
                },
                Some(_) => {},
            },
        }
    }

    handle.stop().await?;
    if let Err(err) = task.await {
        warn!("Session task failed: {}", err);
    }
    Ok(())
}
