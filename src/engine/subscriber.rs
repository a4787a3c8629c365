use std::sync::Arc;
use futures::channel::mpsc::UnboundedSender;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::CONNECT_DELAY;
use crate::error::readable_thread_panic_error;
use crate::transport::{EventSocket, Transport};

/// Listens to the engine's event stream and forwards every message, unmodified.
///
/// Owns exactly one subscription at a time. Changing the address drops the
/// current subscription and opens a new one; transport failures are not
/// reported, the subscriber just resubscribes after `CONNECT_DELAY`.
#[derive(Debug)]
pub struct EventSubscriber {
    address: watch::Sender<String>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl EventSubscriber {
    pub fn start(transport: Arc<dyn Transport>, address: &str, messages: UnboundedSender<String>) -> Self {
        let (address_sender, address_receiver) = watch::channel(address.to_string());
        let cancel = CancellationToken::new();

        let handle = spawn(subscriber_task(cancel.clone(), transport, address_receiver, messages));

        EventSubscriber {
            address: address_sender,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> String {
        self.address.borrow().clone()
    }

    pub fn change_address(&self, address: &str) {
        self.address.send_replace(address.to_string());
    }

    /// Stops the subscriber and waits for its task to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!("Event subscriber failed: {}", readable_thread_panic_error(&err.into_panic()));
                }
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn recv(socket: &mut Option<EventSocket>) -> Option<String> {
    match socket {
        Some(socket) => socket.recv().await,
        // no usable address; wait for a new one
        None => std::future::pending().await,
    }
}

async fn subscriber_task(
    cancel: CancellationToken,
    transport: Arc<dyn Transport>,
    mut address: watch::Receiver<String>,
    messages: UnboundedSender<String>,
) {
    'mainloop: loop {
        let target = address.borrow_and_update().clone();
        info!("Subscribing to engine events on {}", target);

        let mut socket = match transport.subscribe(&target) {
            Ok(socket) => Some(socket),
            Err(err) => {
                warn!("Failed to subscribe to {}: {}", target, err);
                None
            },
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                changed = address.changed() => {
                    if changed.is_err() {
                        break 'mainloop;
                    }
                    continue 'mainloop;
                },
                message = recv(&mut socket) => match message {
                    Some(message) => {
                        if messages.unbounded_send(message).is_err() {
                            break 'mainloop;
                        }
                    },
                    None => {
                        warn!("Subscription to {} closed, resubscribing", target);
                        drop(socket.take());

                        tokio::select! {
                            _ = cancel.cancelled() => break 'mainloop,
                            _ = sleep(Duration::from_millis(CONNECT_DELAY)) => continue 'mainloop,
                        }
                    },
                },
            }
        }
    }

    debug!("Event subscriber stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::unbounded;
    use futures::StreamExt;
    use tokio::time::timeout;

    use crate::transport::memory::MemoryTransport;

    async fn wait_for_subscriber(transport: &MemoryTransport, address: &str) {
        while transport.subscriber_count(address) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn forwards_messages_verbatim_and_in_order() {
        let transport = MemoryTransport::new();
        let (sender, mut receiver) = unbounded();
        let mut subscriber = EventSubscriber::start(Arc::new(transport.clone()), "mem://a", sender);
        wait_for_subscriber(&transport, "mem://a").await;

        transport.publish("mem://a", "first");
        transport.publish("mem://a", "{not even json");

        assert_eq!(receiver.next().await.unwrap(), "first");
        assert_eq!(receiver.next().await.unwrap(), "{not even json");
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn change_address_resubscribes() {
        let transport = MemoryTransport::new();
        let (sender, mut receiver) = unbounded();
        let mut subscriber = EventSubscriber::start(Arc::new(transport.clone()), "mem://a", sender);
        wait_for_subscriber(&transport, "mem://a").await;

        subscriber.change_address("mem://b");
        wait_for_subscriber(&transport, "mem://b").await;

        assert_eq!(transport.publish("mem://a", "old"), 0);
        transport.publish("mem://b", "new");
        assert_eq!(receiver.next().await.unwrap(), "new");
        assert_eq!(subscriber.address(), "mem://b");
        subscriber.stop().await;
    }

    #[tokio::test]
    async fn nothing_is_forwarded_after_stop() {
        let transport = MemoryTransport::new();
        let (sender, mut receiver) = unbounded();
        let mut subscriber = EventSubscriber::start(Arc::new(transport.clone()), "mem://a", sender);
        wait_for_subscriber(&transport, "mem://a").await;

        subscriber.stop().await;
        transport.publish("mem://a", "late");

        // the task dropped its sender when it exited
        assert_eq!(timeout(Duration::from_millis(100), receiver.next()).await.unwrap(), None);
    }
}
