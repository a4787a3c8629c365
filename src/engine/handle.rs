use std::sync::Arc;
use futures::channel::mpsc::{channel, Receiver, Sender, UnboundedReceiver};
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use serde_json::Value;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::constants::SEARCH_DURATION;
use crate::device::led::{LedColor, LedPattern};
use crate::engine::requests::{version_string, EngineRequest};
use crate::engine::session::{Session, SessionInputs};
use crate::engine::types::{SessionEvent, SessionSnapshot};
use crate::error::SessionError;
use crate::transport::Transport;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug)]
enum SessionCommand {
    Execute {
        request: EngineRequest,
        reply: oneshot::Sender<Option<Value>>,
    },
    SearchAndConnect {
        band: String,
        seconds: u64,
        reply: oneshot::Sender<CancellationToken>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<UnboundedReceiver<SessionEvent>>,
    },
    ChangeAddresses {
        publisher_address: String,
        rpc_address: String,
        reply: oneshot::Sender<()>,
    },
    PauseLivenessCheck {
        reply: oneshot::Sender<()>,
    },
    ResumeLivenessCheck {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Starts a session on its own task.
///
/// The task runs until [`SessionHandle::stop`] is called or every handle is dropped.
pub fn spawn_session(transport: Arc<dyn Transport>, config: &Config) -> (SessionHandle, JoinHandle<()>) {
    let (session, inputs) = Session::new(transport, config);
    let (sender, receiver) = channel(COMMAND_BUFFER);

    let task = spawn(session_task(session, inputs, receiver));
    (SessionHandle { commands: sender }, task)
}

async fn session_task(mut session: Session, mut inputs: SessionInputs, mut commands: Receiver<SessionCommand>) {
    let mut stop_reply = None;

    'mainloop: loop {
        tokio::select! {
            Some(message) = inputs.messages.next() => {
                session.handle_message(&message).await;
            },
            Some(mut event) = inputs.heartbeat.next() => {
                // only the latest liveness change matters
                while let Ok(Some(next)) = inputs.heartbeat.try_next() {
                    event = next;
                }
                debug!("Heartbeat event: {:?}", event);
                session.handle_heartbeat(event).await;
            },
            command = commands.next() => match command {
                None => {
                    debug!("Every session handle was dropped");
                    break 'mainloop;
                },
                Some(SessionCommand::Stop { reply }) => {
                    stop_reply = Some(reply);
                    break 'mainloop;
                },
                Some(command) => apply_command(&mut session, command).await,
            },
        }
    }

    session.stop().await;
    if let Some(reply) = stop_reply {
        let _ = reply.send(());
    }
    info!("Session task ended");
}

// a caller that gave up on its reply is not an error
async fn apply_command(session: &mut Session, command: SessionCommand) {
    match command {
        SessionCommand::Execute { request, reply } => {
            let result = session.execute(request).await;
            let _ = reply.send(result);
        },
        SessionCommand::SearchAndConnect { band, seconds, reply } => {
            let cancel = session.search_and_connect(&band, seconds).await;
            let _ = reply.send(cancel);
        },
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
        },
        SessionCommand::Subscribe { reply } => {
            let _ = reply.send(session.subscribe());
        },
        SessionCommand::ChangeAddresses { publisher_address, rpc_address, reply } => {
            session.change_addresses(&publisher_address, &rpc_address);
            let _ = reply.send(());
        },
        SessionCommand::PauseLivenessCheck { reply } => {
            session.pause_liveness_check();
            let _ = reply.send(());
        },
        SessionCommand::ResumeLivenessCheck { reply } => {
            session.resume_liveness_check();
            let _ = reply.send(());
        },
        SessionCommand::Stop { reply } => {
            let _ = reply.send(());
        },
    }
}

/// Cloneable access to a running session.
///
/// Commands are applied one at a time on the session task. Request results
/// are `None` when the engine did not answer in time or answered null.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T, SessionError> {
        let (reply, receiver) = oneshot::channel();

        let mut commands = self.commands.clone();
        commands.send(make(reply)).await.map_err(|_| SessionError::Closed)?;

        receiver.await.map_err(|_| SessionError::Closed)
    }

    pub async fn execute(&self, request: EngineRequest) -> Result<Option<Value>, SessionError> {
        self.call(|reply| SessionCommand::Execute { request, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.call(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Receives every notification the session raises from now on.
    pub async fn subscribe(&self) -> Result<UnboundedReceiver<SessionEvent>, SessionError> {
        self.call(|reply| SessionCommand::Subscribe { reply }).await
    }

    pub async fn change_addresses(&self, publisher_address: &str, rpc_address: &str) -> Result<(), SessionError> {
        let publisher_address = publisher_address.to_string();
        let rpc_address = rpc_address.to_string();
        self.call(|reply| SessionCommand::ChangeAddresses { publisher_address, rpc_address, reply }).await
    }

    pub async fn pause_liveness_check(&self) -> Result<(), SessionError> {
        self.call(|reply| SessionCommand::PauseLivenessCheck { reply }).await
    }

    pub async fn resume_liveness_check(&self) -> Result<(), SessionError> {
        self.call(|reply| SessionCommand::ResumeLivenessCheck { reply }).await
    }

    /// Stops the session and waits until its helpers are shut down.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.call(|reply| SessionCommand::Stop { reply }).await
    }

    /// Searches for `band` and connects it once found. Completion is reported
    /// as [`SessionEvent::SearchAndConnectFinished`]; cancel the returned
    /// token to abandon the workflow.
    pub async fn search_and_connect(&self, band: &str, seconds: u64) -> Result<CancellationToken, SessionError> {
        let band = band.to_string();
        self.call(|reply| SessionCommand::SearchAndConnect { band, seconds, reply }).await
    }

    pub async fn bands(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.snapshot().await?.bands)
    }

    pub async fn is_bound(&self) -> Result<bool, SessionError> {
        Ok(self.snapshot().await?.bound)
    }

    pub async fn currently_searching(&self) -> Result<bool, SessionError> {
        Ok(self.snapshot().await?.currently_searching)
    }

    pub async fn set_activation_state_of_band(&self, band: &str, active: bool) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::SetActivationState { band: band.to_string(), active }).await
    }

    pub async fn buzz_band(&self, band: &str, duration_millis: u64) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::Buzz { band: band.to_string(), duration_millis }).await
    }

    pub async fn set_led_of_band(&self, band: &str, color: LedColor, pattern: Option<LedPattern>) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::SetLed { band: band.to_string(), color, pattern }).await
    }

    pub async fn set_required_gesture_precision(&self, precision: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::SetRequiredGesturePrecisionName { band: None, precision: precision.to_string() }).await
    }

    pub async fn set_required_gesture_precision_of_band(&self, band: &str, precision: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::SetRequiredGesturePrecisionName {
            band: Some(band.to_string()),
            precision: precision.to_string(),
        }).await
    }

    pub async fn change_ble_adapter(&self, interface: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::ChangeBleAdapter { interface: interface.to_string() }).await
    }

    pub async fn search_for_sensors(&self, seconds: u64) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::SearchSensorsFor { seconds }).await
    }

    pub async fn search(&self) -> Result<Option<Value>, SessionError> {
        self.search_for_sensors(SEARCH_DURATION).await
    }

    pub async fn stop_search(&self) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::StopSensorSearch).await
    }

    pub async fn connect(&self, band: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::Connect { band: band.to_string() }).await
    }

    pub async fn connect_strongest(&self) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::ConnectStrongest).await
    }

    pub async fn disconnect_band(&self, band: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::Disconnect { band: band.to_string() }).await
    }

    pub async fn start_airmouse_of_band(&self, band: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::StartAirmouse { band: band.to_string() }).await
    }

    pub async fn stop_airmouse_of_band(&self, band: &str) -> Result<Option<Value>, SessionError> {
        self.execute(EngineRequest::StopAirmouse { band: band.to_string() }).await
    }

    /// The engine's version, or `None` if it did not answer.
    pub async fn sdk_version(&self) -> Result<Option<String>, SessionError> {
        let result = self.execute(EngineRequest::GetVersion).await?;
        Ok(result.as_ref().and_then(version_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::transport::memory::{FakeEngine, MemoryTransport};

    fn config() -> Config {
        Config {
            publisher_address: "mem://pub".to_string(),
            rpc_address: "mem://rpc".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn commands_reach_the_engine() {
        let transport = MemoryTransport::new();
        let engine = FakeEngine::start(&transport, "mem://rpc", |method, _| match method {
            "getVersion" => Some(json!("4.1.0")),
            _ => Some(json!(true)),
        });
        let (handle, task) = spawn_session(Arc::new(transport), &config());

        assert_eq!(handle.sdk_version().await.unwrap(), Some("4.1.0".to_string()));
        assert_eq!(handle.buzz_band("A", 300).await.unwrap(), Some(json!(true)));
        assert_eq!(handle.connect_strongest().await.unwrap(), Some(json!(true)));
        let buzz = &engine.requests()[1];
        assert_eq!(buzz["method"], "buzz");
        assert_eq!(buzz["params"], json!({"band": "A", "duration_millis": 300}));

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_session_reports_closed() {
        let (handle, task) = spawn_session(Arc::new(MemoryTransport::new()), &config());
        handle.stop().await.unwrap();
        task.await.unwrap();

        assert!(matches!(handle.snapshot().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn dropping_every_handle_ends_the_task() {
        let (handle, task) = spawn_session(Arc::new(MemoryTransport::new()), &config());
        let second = handle.clone();
        drop(handle);
        assert!(!second.is_bound().await.unwrap());
        drop(second);

        task.await.unwrap();
    }
}
