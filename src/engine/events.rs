//! Decoding of event-stream messages.
//!
//! Every message is one JSON object `{"type": <TypeName>, "parameters": {...}}`.
//! Unknown type names decode to `None` and are ignored by the session.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::EventError;

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MouseEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub band: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub palm_direction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gesture {
    pub band: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Activation {
    pub band: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchResult {
    pub address: String,
    pub rssi: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionCandidate {
    pub address: String,
    pub confidence: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorUpdate {
    pub band: String,
    #[serde(default)]
    pub battery: Option<f64>,
    #[serde(default)]
    pub stream_quality: Option<f64>,
    // reserved: carried by the engine but not acted upon
    #[serde(default)]
    pub connection: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionState {
    pub band: String,
    pub state: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Button {
    pub band: String,
    pub pressed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Heartbeat,
    MouseEvent(MouseEvent),
    Gesture(Gesture),
    Activation(Activation),
    SearchResult(SearchResult),
    SearchStarted,
    SearchStopped,
    ConnectionCandidate(ConnectionCandidate),
    SensorUpdate(SensorUpdate),
    ConnectionState(ConnectionState),
    Button(Button),
}

fn parameters<T: DeserializeOwned>(raw: RawEvent) -> Result<T, EventError> {
    match raw.parameters {
        None | Some(Value::Null) => Err(EventError::MissingParameters { event_type: raw.event_type }),
        Some(parameters) => Ok(serde_json::from_value(parameters)?),
    }
}

/// Decodes one event-stream message. Returns `Ok(None)` for unrecognized event types.
pub fn decode_event(message: &str) -> Result<Option<EngineEvent>, EventError> {
    let raw: RawEvent = serde_json::from_str(message)?;

    let event = match raw.event_type.as_str() {
        "Heartbeat" => EngineEvent::Heartbeat,
        "SearchStarted" => EngineEvent::SearchStarted,
        "SearchStopped" => EngineEvent::SearchStopped,
        "MouseEvent" => EngineEvent::MouseEvent(parameters(raw)?),
        "Gesture" => EngineEvent::Gesture(parameters(raw)?),
        "Activation" => EngineEvent::Activation(parameters(raw)?),
        "SearchResult" => EngineEvent::SearchResult(parameters(raw)?),
        "ConnectionCandidate" => EngineEvent::ConnectionCandidate(parameters(raw)?),
        "SensorUpdate" => EngineEvent::SensorUpdate(parameters(raw)?),
        "ConnectionState" => EngineEvent::ConnectionState(parameters(raw)?),
        "Button" => EngineEvent::Button(parameters(raw)?),
        _ => return Ok(None),
    };

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_heartbeat_without_parameters() {
        let event = decode_event(r#"{"type": "Heartbeat"}"#).unwrap();
        assert_eq!(event, Some(EngineEvent::Heartbeat));
    }

    #[test]
    fn decodes_partial_sensor_update() {
        let event = decode_event(
            r#"{"type": "SensorUpdate", "parameters": {"band": "A", "battery": 55}}"#
        ).unwrap();

        assert_eq!(event, Some(EngineEvent::SensorUpdate(SensorUpdate {
            band: "A".to_string(),
            battery: Some(55.0),
            stream_quality: None,
            connection: None,
        })));
    }

    #[test]
    fn decodes_connection_state_with_null_reason() {
        let event = decode_event(
            r#"{"type": "ConnectionState", "parameters": {"band": "A", "state": "CONNECTED", "reason": null}}"#
        ).unwrap();

        assert_eq!(event, Some(EngineEvent::ConnectionState(ConnectionState {
            band: "A".to_string(),
            state: "CONNECTED".to_string(),
            reason: None,
        })));
    }

    #[test]
    fn decodes_mouse_event_type_field() {
        let event = decode_event(
            r#"{"type": "MouseEvent", "parameters": {"type": "move", "band": "A", "x": 0.5, "y": -1.0, "palm_direction": "DOWN"}}"#
        ).unwrap();

        let mouse = match event {
            Some(EngineEvent::MouseEvent(mouse)) => mouse,
            other => panic!("expected a mouse event, got {:?}", other),
        };
        assert_eq!(mouse.kind, "move");
        assert_eq!(mouse.x, Some(0.5));
        assert_eq!(mouse.palm_direction.as_deref(), Some("DOWN"));
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert_eq!(decode_event(r#"{"type": "Telemetry", "parameters": {}}"#).unwrap(), None);
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(decode_event("not json"), Err(EventError::Json { .. })));
        assert!(matches!(
            decode_event(r#"{"type": "Gesture"}"#),
            Err(EventError::MissingParameters { .. })
        ));
        assert!(decode_event(r#"{"type": "Gesture", "parameters": {"band": "A"}}"#).is_err());
    }
}
