use std::sync::{Arc, Mutex, PoisonError};
use futures::channel::mpsc::UnboundedSender;
use log::{debug, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Emitted on every `reset()`.
    Established,
    /// Emitted by the timer while listening and no reset happened within the timeout.
    Lost,
}

#[derive(Debug)]
struct HeartbeatInner {
    last_reset: Instant,
    listening: bool,
    running: bool,
}

/// Liveness watchdog. Call `reset()` whenever traffic from the engine is seen.
///
/// A timer task checks every half timeout whether the last reset is older
/// than the timeout and emits `Lost` if so. Emission and `stop()` share a
/// lock, so nothing is emitted once `stop()` has returned.
#[derive(Debug)]
pub struct Heartbeat {
    timeout: Duration,
    inner: Arc<Mutex<HeartbeatInner>>,
    events: UnboundedSender<HeartbeatEvent>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(timeout: Duration, events: UnboundedSender<HeartbeatEvent>) -> Self {
        let inner = HeartbeatInner {
            last_reset: Instant::now(),
            listening: true,
            running: false,
        };

        Heartbeat {
            timeout,
            inner: Arc::new(Mutex::new(inner)),
            events,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeartbeatInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&mut self) {
        if self.handle.is_some() || self.cancel.is_cancelled() {
            return;
        }

        {
            let mut inner = self.lock();
            inner.last_reset = Instant::now();
            inner.running = true;
        }

        self.handle = Some(spawn(watchdog_task(
            self.cancel.clone(),
            self.timeout,
            self.inner.clone(),
            self.events.clone(),
        )));
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        if !inner.running {
            return;
        }

        inner.last_reset = Instant::now();
        // the receiver only goes away when the session is shutting down
        let _ = self.events.unbounded_send(HeartbeatEvent::Established);
    }

    pub fn pause_listening(&self) {
        self.lock().listening = false;
    }

    pub fn resume_listening(&self) {
        self.lock().listening = true;
    }

    pub fn stop(&mut self) {
        self.lock().running = false;
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watchdog_task(
    cancel: CancellationToken,
    timeout: Duration,
    inner: Arc<Mutex<HeartbeatInner>>,
    events: UnboundedSender<HeartbeatEvent>,
) {
    let interval = timeout / 2;

    'mainloop: loop {
        {
            let inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if !inner.running {
                break 'mainloop;
            }

            let elapsed = inner.last_reset.elapsed();
            if inner.listening && elapsed > timeout {
                warn!("No traffic from the engine for {}", humantime::format_duration(elapsed));
                if events.unbounded_send(HeartbeatEvent::Lost).is_err() {
                    break 'mainloop;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = sleep(interval) => {},
        }
    }

    debug!("Heartbeat watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{unbounded, UnboundedReceiver};
    use futures::StreamExt;
    use tokio::time::timeout;

    fn heartbeat() -> (Heartbeat, UnboundedReceiver<HeartbeatEvent>) {
        let (sender, receiver) = unbounded();
        let mut heartbeat = Heartbeat::new(Duration::from_secs(3), sender);
        heartbeat.start();
        (heartbeat, receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn lost_is_emitted_after_timeout() {
        let (_heartbeat, mut events) = heartbeat();

        let event = timeout(Duration::from_secs(5), events.next()).await.unwrap();
        assert_eq!(event, Some(HeartbeatEvent::Lost));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_emitted_within_timeout() {
        let (_heartbeat, mut events) = heartbeat();

        assert!(timeout(Duration::from_millis(2900), events.next()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn every_reset_emits_established() {
        let (heartbeat, mut events) = heartbeat();

        heartbeat.reset();
        heartbeat.reset();

        assert_eq!(events.next().await, Some(HeartbeatEvent::Established));
        assert_eq!(events.next().await, Some(HeartbeatEvent::Established));
    }

    #[tokio::test(start_paused = true)]
    async fn resets_keep_the_connection_alive() {
        let (heartbeat, mut events) = heartbeat();

        for _ in 0..6 {
            sleep(Duration::from_secs(1)).await;
            heartbeat.reset();
            assert_eq!(events.next().await, Some(HeartbeatEvent::Established));
        }

        assert!(timeout(Duration::from_millis(2900), events.next()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_listening_suppresses_lost() {
        let (heartbeat, mut events) = heartbeat();
        heartbeat.pause_listening();

        assert!(timeout(Duration::from_secs(10), events.next()).await.is_err());

        heartbeat.resume_listening();
        let event = timeout(Duration::from_secs(2), events.next()).await.unwrap();
        assert_eq!(event, Some(HeartbeatEvent::Lost));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_all_emissions() {
        let (mut heartbeat, mut events) = heartbeat();
        heartbeat.stop();
        heartbeat.reset();

        assert!(timeout(Duration::from_secs(10), events.next()).await.is_err());
    }
}
