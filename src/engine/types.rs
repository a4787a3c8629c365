use indexmap::IndexMap;

use crate::device::constants::DISCONNECTED;
use crate::device::types::BandState;

/// Notifications raised by the session for its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BandFound { address: String, rssi: i64 },
    ConnectCandidateUpdated { address: String, confidence: i64 },
    SearchStarted,
    SearchStopped,
    ConnectionStateChanged { band: String, state: String },
    ActivationStateChanged { band: String, active: bool },
    ButtonStateChanged { band: String, pressed: bool },
    BatteryChanged { band: String, battery: i64 },
    StreamQualityChanged { band: String, stream_quality: i64 },
    Gesture { band: String, name: String },
    MouseMoved { band: String, x: f64, y: f64, palm_direction: String },
    Bound(bool),
    SearchAndConnectFinished { band: String, found: bool },
}

/// A copy of the session state, taken on the session task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub bound: bool,
    pub currently_searching: bool,
    /// The active band set, in order.
    pub bands: Vec<String>,
    /// Cached attributes of every band the session knows about.
    pub states: IndexMap<String, BandState>,
}

impl SessionSnapshot {
    fn state(&self, band: &str) -> Option<&BandState> {
        self.states.get(band)
    }

    pub fn connection_state_of_band(&self, band: &str) -> &str {
        self.state(band).map(BandState::connection_state_name).unwrap_or(DISCONNECTED)
    }

    pub fn connection_reason_of_band(&self, band: &str) -> Option<&str> {
        self.state(band)?.connection_reason.as_deref()
    }

    pub fn battery_of_band(&self, band: &str) -> Option<i64> {
        self.state(band)?.battery
    }

    pub fn stream_quality_of_band(&self, band: &str) -> Option<i64> {
        self.state(band)?.stream_quality
    }

    pub fn activation_state_of_band(&self, band: &str) -> Option<bool> {
        self.state(band)?.activation
    }

    pub fn required_gesture_precision_of_band(&self, band: &str) -> Option<&str> {
        self.state(band)?.gesture_precision.as_deref()
    }
}
