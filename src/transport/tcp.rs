use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::CONNECT_DELAY;
use crate::error::TransportError;
use crate::transport::{EventSocket, RequestSocket, Transport};

/// Newline delimited text frames over TCP, addressed as `tcp://host:port`.
///
/// Sockets connect in the background and keep reconnecting every
/// `CONNECT_DELAY` milliseconds until they are dropped. Frames queued on a
/// request socket while it is disconnected are sent once it connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

pub fn parse_address(address: &str) -> Result<String, TransportError> {
    match address.strip_prefix("tcp://") {
        Some(target) if !target.is_empty() => Ok(target.to_string()),
        _ => Err(TransportError::UnsupportedAddress { address: address.to_string() }),
    }
}

impl Transport for TcpTransport {
    fn subscribe(&self, address: &str) -> Result<EventSocket, TransportError> {
        let target = parse_address(address)?;
        let cancel = CancellationToken::new();
        let (sender, receiver) = unbounded::<String>();

        spawn(subscriber_task(cancel.clone(), target, sender));

        Ok(EventSocket::new(receiver, Some(cancel.drop_guard())))
    }

    fn connect_requests(&self, address: &str) -> Result<RequestSocket, TransportError> {
        let target = parse_address(address)?;
        let cancel = CancellationToken::new();
        let (outgoing_sender, outgoing_receiver) = unbounded::<String>();
        let (incoming_sender, incoming_receiver) = unbounded::<String>();

        spawn(request_task(cancel.clone(), target, outgoing_receiver, incoming_sender));

        Ok(RequestSocket::new(outgoing_sender, incoming_receiver, Some(cancel.drop_guard())))
    }
}

// Returns None once cancelled.
async fn connect(cancel: &CancellationToken, target: &str, retry: bool) -> Option<TcpStream> {
    let mut retry = retry;

    loop {
        if retry {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(Duration::from_millis(CONNECT_DELAY)) => {},
            }
        }
        retry = true;

        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = TcpStream::connect(target) => match result {
                Ok(stream) => {
                    info!("Connected to {}", target);
                    return Some(stream);
                },
                Err(err) => {
                    debug!("Connecting to {} failed: {}", target, err);
                },
            }
        }
    }
}

async fn subscriber_task(cancel: CancellationToken, target: String, sender: UnboundedSender<String>) {
    let mut retry = false;

    'mainloop: loop {
        let stream = match connect(&cancel, &target, retry).await {
            Some(stream) => stream,
            None => break 'mainloop,
        };
        retry = true;

        let mut lines = BufReader::new(stream).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if sender.unbounded_send(line).is_err() {
                            break 'mainloop;
                        }
                    },
                    Ok(None) => {
                        warn!("Publisher {} closed the connection", target);
                        break;
                    },
                    Err(err) => {
                        warn!("Reading from publisher {} failed: {}", target, err);
                        break;
                    },
                }
            }
        }
    }

    debug!("Subscriber socket for {} closed", target);
}

async fn request_task(
    cancel: CancellationToken,
    target: String,
    mut outgoing: UnboundedReceiver<String>,
    incoming: UnboundedSender<String>,
) {
    let mut retry = false;

    'mainloop: loop {
        let stream = match connect(&cancel, &target, retry).await {
            Some(stream) => stream,
            None => break 'mainloop,
        };
        retry = true;

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                message = outgoing.next() => match message {
                    None => break 'mainloop,
                    Some(mut message) => {
                        message.push('\n');
                        if let Err(err) = writer.write_all(message.as_bytes()).await {
                            warn!("Writing to {} failed: {}", target, err);
                            break;
                        }
                    },
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if incoming.unbounded_send(line).is_err() {
                            break 'mainloop;
                        }
                    },
                    Ok(None) => {
                        warn!("Request peer {} closed the connection", target);
                        break;
                    },
                    Err(err) => {
                        warn!("Reading from {} failed: {}", target, err);
                        break;
                    },
                }
            }
        }
    }

    debug!("Request socket for {} closed", target);
}
