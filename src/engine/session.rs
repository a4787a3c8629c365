//! The session controller.
//!
//! [`Session`] owns the event subscriber, the request channel, the heartbeat
//! watchdog and every cached band attribute. It is driven from a single task
//! (see [`crate::engine::handle`]): event-stream messages, heartbeat events
//! and external commands are all applied there, one at a time.

use std::sync::Arc;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::constants::{CONNECTED, DISCONNECTED};
use crate::device::types::{BandState, BandTable};
use crate::engine::events::{decode_event, EngineEvent};
use crate::engine::heartbeat::{Heartbeat, HeartbeatEvent};
use crate::engine::requests::EngineRequest;
use crate::engine::rpc::RpcChannel;
use crate::engine::search::{SearchAction, SearchAndConnect};
use crate::engine::subscriber::EventSubscriber;
use crate::engine::types::{SessionEvent, SessionSnapshot};
use crate::transport::Transport;

/// Receivers for everything the session's helpers report back to it.
#[derive(Debug)]
pub struct SessionInputs {
    pub messages: UnboundedReceiver<String>,
    pub heartbeat: UnboundedReceiver<HeartbeatEvent>,
}

fn into_string(value: Value) -> Option<String> {
    match value {
        Value::String(string) => Some(string),
        _ => None,
    }
}

fn into_integer(value: Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|float| float as i64))
}

#[derive(Debug)]
pub struct Session {
    rpc: RpcChannel,
    subscriber: EventSubscriber,
    heartbeat: Heartbeat,
    table: BandTable,
    bound: bool,
    /// After a failed bind, further attempts wait until this instant.
    bind_retry_at: Option<Instant>,
    currently_searching: bool,
    workflows: Vec<SearchAndConnect>,
    observers: Vec<UnboundedSender<SessionEvent>>,
    cancel: CancellationToken,
}

impl Session {
    /// Creates the session and starts its subscriber and watchdog.
    /// Must be called within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> (Session, SessionInputs) {
        let (message_sender, messages) = unbounded();
        let (heartbeat_sender, heartbeat_events) = unbounded();

        let mut heartbeat = Heartbeat::new(config.heartbeat_timeout(), heartbeat_sender);
        heartbeat.start();

        let subscriber = EventSubscriber::start(transport.clone(), &config.publisher_address, message_sender);

        let mut rpc = RpcChannel::new(transport, config.request_timeout());
        rpc.change_address(&config.rpc_address);

        let session = Session {
            rpc,
            subscriber,
            heartbeat,
            table: BandTable::new(config.favorite_bands.clone()),
            bound: false,
            bind_retry_at: None,
            currently_searching: false,
            workflows: Vec::new(),
            observers: Vec::new(),
            cancel: CancellationToken::new(),
        };

        let inputs = SessionInputs {
            messages,
            heartbeat: heartbeat_events,
        };

        (session, inputs)
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<SessionEvent> {
        let (sender, receiver) = unbounded();
        self.observers.push(sender);
        receiver
    }

    fn notify(&mut self, event: SessionEvent) {
        self.observers.retain(|observer| observer.unbounded_send(event.clone()).is_ok());
    }

    fn notify_connection_state(&mut self, band: &str, state: &str) {
        self.notify(SessionEvent::ConnectionStateChanged {
            band: band.to_string(),
            state: state.to_string(),
        });
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn currently_searching(&self) -> bool {
        self.currently_searching
    }

    pub fn bands(&self) -> Vec<String> {
        self.table.bands()
    }

    pub fn band_state(&self, band: &str) -> BandState {
        self.table.state(band).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            bound: self.bound,
            currently_searching: self.currently_searching,
            bands: self.table.bands(),
            states: self.table.snapshot(),
        }
    }

    pub fn pause_liveness_check(&self) {
        self.heartbeat.pause_listening();
    }

    pub fn resume_liveness_check(&self) {
        self.heartbeat.resume_listening();
    }

    async fn request(&mut self, request: EngineRequest) -> Option<Value> {
        self.rpc.send(request.method(), request.params()).await
    }

    /// Sends a command to the engine, keeping the cache in step with setters.
    pub async fn execute(&mut self, request: EngineRequest) -> Option<Value> {
        match &request {
            EngineRequest::SetRequiredGesturePrecisionName { band: Some(band), precision } => {
                self.table.state_mut(band).gesture_precision = Some(precision.clone());
            },
            EngineRequest::SetRequiredGesturePrecisionName { band: None, precision } => {
                for band in self.table.known_bands() {
                    self.table.state_mut(&band).gesture_precision = Some(precision.clone());
                }
            },
            _ => {},
        }

        let cache_activation = match &request {
            EngineRequest::SetActivationState { band, active } => Some((band.clone(), *active)),
            _ => None,
        };

        let result = self.request(request).await;

        if let Some((band, active)) = cache_activation {
            self.table.state_mut(&band).activation = Some(active);
        }

        result
    }

    /// Starts a search-and-connect workflow for `band`. Cancel the returned
    /// token to abandon it without a completion notification.
    pub async fn search_and_connect(&mut self, band: &str, seconds: u64) -> CancellationToken {
        let cancel = self.cancel.child_token();
        let (workflow, action) = SearchAndConnect::begin(band, seconds, self.currently_searching, cancel.clone());

        self.workflows.push(workflow);
        self.perform(action).await;
        cancel
    }

    async fn perform(&mut self, action: SearchAction) {
        match action {
            SearchAction::Nothing => {},
            SearchAction::StartSearch { seconds } => {
                self.request(EngineRequest::SearchSensorsFor { seconds }).await;
            },
            SearchAction::Connect { band } => {
                self.request(EngineRequest::Connect { band }).await;
            },
            SearchAction::Finished { band, found } => {
                info!("Search-and-connect for {} finished (found: {})", band, found);
                self.notify(SessionEvent::SearchAndConnectFinished { band, found });
            },
        }
    }

    async fn advance_workflows(&mut self, step: impl Fn(&mut SearchAndConnect) -> SearchAction) {
        let mut actions = Vec::new();

        self.workflows.retain_mut(|workflow| {
            if workflow.is_cancelled() {
                return false;
            }
            let action = step(workflow);
            let finished = matches!(action, SearchAction::Finished { .. });
            actions.push(action);
            !finished
        });

        for action in actions {
            self.perform(action).await;
        }
    }

    fn finish_workflows(&mut self) {
        for mut workflow in std::mem::take(&mut self.workflows) {
            if workflow.is_cancelled() {
                continue;
            }
            if let SearchAction::Finished { band, found } = workflow.finish() {
                self.notify(SessionEvent::SearchAndConnectFinished { band, found });
            }
        }
    }

    pub async fn handle_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Established => self.bind().await,
            HeartbeatEvent::Lost => self.unbind(),
        }
    }

    /// Transition to bound: synchronizes every band with the engine.
    /// A no-op while already bound, and for one heartbeat timeout after a
    /// failed attempt.
    pub async fn bind(&mut self) {
        if self.bound {
            return;
        }
        if let Some(retry_at) = self.bind_retry_at {
            if Instant::now() < retry_at {
                debug!("Last bind failed recently, not retrying yet");
                return;
            }
        }

        info!("Engine reachable, synchronizing band states");
        if self.init_states().await {
            self.bound = true;
            self.bind_retry_at = None;
            info!("Bound to engine");
            self.notify(SessionEvent::Bound(true));
        } else {
            warn!("Synchronizing with the engine failed, staying unbound");
            self.bind_retry_at = Some(Instant::now() + self.heartbeat.timeout());
            self.reset_states();
        }
    }

    /// Transition to unbound: every cached attribute is dropped.
    /// A no-op while already unbound.
    pub fn unbind(&mut self) {
        if !self.bound {
            return;
        }

        warn!("Lost connection to the engine");
        self.reset_states();
        self.bound = false;
        self.notify(SessionEvent::Bound(false));
    }

    fn reset_states(&mut self) {
        for band in self.table.bands() {
            self.notify_connection_state(&band, DISCONNECTED);
        }
        self.table.reset_to_favorites();
        self.currently_searching = false;
        self.finish_workflows();
    }

    fn reset_band(&mut self, band: &str) {
        self.table.reset_band(band);
        self.notify_connection_state(band, DISCONNECTED);
    }

    async fn init_states(&mut self) -> bool {
        let previous = self.table.bands();

        let Some(reported) = self.request(EngineRequest::GetBands).await else {
            return false;
        };
        let reported: Vec<String> = match serde_json::from_value(reported) {
            Ok(reported) => reported,
            Err(err) => {
                warn!("Engine reported a malformed band list: {}", err);
                return false;
            },
        };

        self.table.set_bands(&reported);

        for band in previous {
            if !self.table.contains(&band) {
                self.reset_band(&band);
            }
        }

        for band in self.table.bands() {
            if !self.init_state(&band).await {
                return false;
            }
        }

        true
    }

    async fn query_state(&mut self, band: &str) -> Option<BandState> {
        let band_name = band.to_string();

        let connection_state = self
            .request(EngineRequest::GetConnectionStateName { band: band_name.clone() })
            .await
            .and_then(into_string)?;
        let battery = self
            .request(EngineRequest::GetBattery { band: band_name.clone() })
            .await
            .and_then(into_integer)?;
        let stream_quality = self
            .request(EngineRequest::GetStreamQuality { band: band_name.clone() })
            .await
            .and_then(into_integer)?;
        let activation = self
            .request(EngineRequest::GetActivationState { band: band_name.clone() })
            .await
            .and_then(|value| value.as_bool())?;
        let gesture_precision = self
            .request(EngineRequest::GetRequiredGesturePrecisionName { band: band_name })
            .await
            .and_then(into_string);

        Some(BandState {
            connection_state: Some(connection_state),
            connection_reason: None,
            battery: Some(battery),
            stream_quality: Some(stream_quality),
            activation: Some(activation),
            gesture_precision,
        })
    }

    /// Queries every attribute of `band` and notifies observers of the result.
    /// Returns false if a required query failed.
    async fn init_state(&mut self, band: &str) -> bool {
        self.table.insert(band);

        let Some(state) = self.query_state(band).await else {
            warn!("{} Failed to query band state", band);
            return false;
        };
        *self.table.state_mut(band) = state.clone();

        let band = band.to_string();
        self.notify_connection_state(&band, state.connection_state_name());
        if let Some(battery) = state.battery {
            self.notify(SessionEvent::BatteryChanged { band: band.clone(), battery });
        }
        if let Some(stream_quality) = state.stream_quality {
            self.notify(SessionEvent::StreamQualityChanged { band: band.clone(), stream_quality });
        }
        if let Some(active) = state.activation {
            self.notify(SessionEvent::ActivationStateChanged { band, active });
        }

        true
    }

    /// Applies one raw event-stream message. Any message counts as engine traffic.
    pub async fn handle_message(&mut self, message: &str) {
        self.heartbeat.reset();

        match decode_event(message) {
            Ok(Some(event)) => self.handle_event(event).await,
            Ok(None) => debug!("Ignoring unknown event: {}", message),
            Err(err) => warn!("Dropping malformed event {:?}: {}", message, err),
        }
    }

    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Heartbeat => {},

            EngineEvent::MouseEvent(mouse) => {
                if mouse.kind != "move" {
                    return;
                }
                if let (Some(x), Some(y)) = (mouse.x, mouse.y) {
                    self.notify(SessionEvent::MouseMoved {
                        band: mouse.band,
                        x,
                        y,
                        palm_direction: mouse.palm_direction.unwrap_or_default(),
                    });
                }
            },

            EngineEvent::Gesture(gesture) => {
                info!("{} Received Gesture: {}", gesture.band, gesture.name);
                self.notify(SessionEvent::Gesture { band: gesture.band, name: gesture.name });
            },

            EngineEvent::Activation(activation) => {
                info!("{} Band changed activation state: {}", activation.band, activation.active);
                self.table.state_mut(&activation.band).activation = Some(activation.active);
                self.notify(SessionEvent::ActivationStateChanged {
                    band: activation.band,
                    active: activation.active,
                });
            },

            EngineEvent::SearchResult(result) => {
                info!("Available Sensor: {} ({}dBm)", result.address, result.rssi);
                self.notify(SessionEvent::BandFound {
                    address: result.address.clone(),
                    rssi: result.rssi,
                });
                self.advance_workflows(|workflow| workflow.on_search_result(&result.address)).await;
            },

            EngineEvent::SearchStarted => {
                self.currently_searching = true;
                self.notify(SessionEvent::SearchStarted);
            },

            EngineEvent::SearchStopped => {
                self.currently_searching = false;
                self.notify(SessionEvent::SearchStopped);
                self.advance_workflows(SearchAndConnect::on_search_stopped).await;
            },

            EngineEvent::ConnectionCandidate(candidate) => {
                info!("AutoConnect Candidate: {} ({}%)", candidate.address, candidate.confidence);
                self.notify(SessionEvent::ConnectCandidateUpdated {
                    address: candidate.address,
                    confidence: candidate.confidence,
                });
            },

            EngineEvent::SensorUpdate(update) => {
                let band = update.band;
                if let Some(battery) = update.battery {
                    let battery = battery as i64;
                    info!("{} Sensor battery charge: {}%", band, battery);
                    self.table.state_mut(&band).battery = Some(battery);
                    self.notify(SessionEvent::BatteryChanged { band: band.clone(), battery });
                }
                if let Some(stream_quality) = update.stream_quality {
                    let stream_quality = stream_quality as i64;
                    info!("{} Stream Quality Update: {}%", band, stream_quality);
                    self.table.state_mut(&band).stream_quality = Some(stream_quality);
                    self.notify(SessionEvent::StreamQualityChanged { band, stream_quality });
                }
            },

            EngineEvent::ConnectionState(change) => {
                let band = change.band;
                info!("{} Band changed connection state: {}", band, change.state);

                {
                    let state = self.table.state_mut(&band);
                    state.connection_state = Some(change.state.clone());
                    state.connection_reason = change.reason;
                }

                if change.state == CONNECTED {
                    // the cache of a freshly connected band is stale
                    if !self.init_state(&band).await {
                        if self.bound {
                            self.unbind();
                        } else {
                            self.reset_band(&band);
                        }
                    }
                } else if change.state == DISCONNECTED {
                    self.notify_connection_state(&band, DISCONNECTED);
                    self.table.reset_band(&band);
                } else {
                    self.notify_connection_state(&band, &change.state);
                }
            },

            EngineEvent::Button(button) => {
                self.notify(SessionEvent::ButtonStateChanged {
                    band: button.band,
                    pressed: button.pressed,
                });
            },
        }
    }

    /// Points both channels at new addresses. The session unbinds first.
    pub fn change_addresses(&mut self, publisher_address: &str, rpc_address: &str) {
        info!("Changing engine addresses to {} / {}", publisher_address, rpc_address);
        self.unbind();
        self.bind_retry_at = None;
        self.subscriber.change_address(publisher_address);
        self.rpc.change_address(rpc_address);
    }

    /// Stops the subscriber (waiting for it), closes the request socket and
    /// stops the watchdog. Pending search-and-connect workflows are abandoned.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.workflows.clear();
        self.subscriber.stop().await;
        self.rpc.close();
        self.heartbeat.stop();
        info!("Session stopped");
    }
}
