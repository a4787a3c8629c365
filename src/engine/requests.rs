use serde_json::{json, Value};

use crate::device::led::{LedColor, LedPattern};
use crate::engine::rpc::Params;

/// The fixed command surface of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    GetBands,
    GetConnectionStateName { band: String },
    GetBattery { band: String },
    GetStreamQuality { band: String },
    GetActivationState { band: String },
    SetActivationState { band: String, active: bool },
    GetRequiredGesturePrecisionName { band: String },
    /// `band: None` applies the precision to every band.
    SetRequiredGesturePrecisionName { band: Option<String>, precision: String },
    Buzz { band: String, duration_millis: u64 },
    SetLed { band: String, color: LedColor, pattern: Option<LedPattern> },
    ChangeBleAdapter { interface: String },
    SearchSensorsFor { seconds: u64 },
    StopSensorSearch,
    Connect { band: String },
    ConnectStrongest,
    Disconnect { band: String },
    StartAirmouse { band: String },
    StopAirmouse { band: String },
    GetVersion,
}

impl EngineRequest {
    pub fn method(&self) -> &'static str {
        match self {
            EngineRequest::GetBands => "getBands",
            EngineRequest::GetConnectionStateName { .. } => "getConnectionStateName",
            EngineRequest::GetBattery { .. } => "getBattery",
            EngineRequest::GetStreamQuality { .. } => "getStreamQuality",
            EngineRequest::GetActivationState { .. } => "getActivationState",
            EngineRequest::SetActivationState { .. } => "setActivationState",
            EngineRequest::GetRequiredGesturePrecisionName { .. } => "getRequiredGesturePrecisionName",
            EngineRequest::SetRequiredGesturePrecisionName { .. } => "setRequiredGesturePrecisionName",
            EngineRequest::Buzz { .. } => "buzz",
            EngineRequest::SetLed { pattern: None, .. } => "setLed",
            EngineRequest::SetLed { pattern: Some(_), .. } => "setLedPattern",
            EngineRequest::ChangeBleAdapter { .. } => "changeBLEAdapter",
            EngineRequest::SearchSensorsFor { .. } => "searchSensorsFor",
            EngineRequest::StopSensorSearch => "stopSensorSearch",
            EngineRequest::Connect { .. } => "connect",
            EngineRequest::ConnectStrongest => "connectStrongest",
            EngineRequest::Disconnect { .. } => "disconnect",
            EngineRequest::StartAirmouse { .. } => "startAirmouse",
            EngineRequest::StopAirmouse { .. } => "stopAirmouse",
            EngineRequest::GetVersion => "getVersion",
        }
    }

    pub fn params(&self) -> Params {
        match self {
            EngineRequest::GetBands
            | EngineRequest::StopSensorSearch
            | EngineRequest::ConnectStrongest
            | EngineRequest::GetVersion => Params::None,

            EngineRequest::GetConnectionStateName { band }
            | EngineRequest::GetBattery { band }
            | EngineRequest::GetStreamQuality { band }
            | EngineRequest::GetActivationState { band }
            | EngineRequest::GetRequiredGesturePrecisionName { band }
            | EngineRequest::Connect { band }
            | EngineRequest::Disconnect { band }
            | EngineRequest::StartAirmouse { band }
            | EngineRequest::StopAirmouse { band } => Params::named([("band", json!(band))]),

            EngineRequest::SetActivationState { band, active } => Params::named([
                ("band", json!(band)),
                ("state", json!(active)),
            ]),
            EngineRequest::SetRequiredGesturePrecisionName { band: Some(band), precision } => Params::named([
                ("band", json!(band)),
                ("precision", json!(precision)),
            ]),
            EngineRequest::SetRequiredGesturePrecisionName { band: None, precision } => Params::named([
                ("precision", json!(precision)),
            ]),
            EngineRequest::Buzz { band, duration_millis } => Params::named([
                ("band", json!(band)),
                ("duration_millis", json!(duration_millis)),
            ]),
            EngineRequest::SetLed { band, color, pattern } => {
                let (red, green, blue) = color.rgb();
                let mut params = vec![
                    ("band", json!(band)),
                    ("red", json!(red)),
                    ("green", json!(green)),
                    ("blue", json!(blue)),
                ];
                if let Some(pattern) = pattern {
                    params.push(("pattern", json!(pattern)));
                }
                Params::named(params)
            },
            EngineRequest::ChangeBleAdapter { interface } => Params::named([("interface", json!(interface))]),
            EngineRequest::SearchSensorsFor { seconds } => Params::named([("seconds", json!(seconds))]),
        }
    }
}

/// Converts a request result into the engine version string, if it is one.
pub fn version_string(result: &Value) -> Option<String> {
    match result {
        Value::String(version) => Some(version.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_value(request: &EngineRequest) -> Value {
        match request.params() {
            Params::Named(map) => Value::Object(map),
            Params::Positional(list) => Value::Array(list),
            Params::None => Value::Null,
        }
    }

    #[test]
    fn blink_pattern_uses_set_led_pattern() {
        let request = EngineRequest::SetLed {
            band: "A".to_string(),
            color: LedColor::Off,
            pattern: Some("BLINK".parse().unwrap()),
        };

        assert_eq!(request.method(), "setLedPattern");
        assert_eq!(params_value(&request), json!({
            "band": "A",
            "red": false,
            "green": false,
            "blue": false,
            "pattern": {
                "high_intensity": 31,
                "low_intensity": 0,
                "rise_time_ms": 200,
                "high_time_ms": 400,
                "fall_time_ms": 200,
                "pulse_duration_ms": 1800,
                "delay_time_ms": 0,
                "repeat_count": 255,
            },
        }));
    }

    #[test]
    fn static_color_uses_set_led() {
        let request = EngineRequest::SetLed {
            band: "A".to_string(),
            color: LedColor::Yellow,
            pattern: None,
        };

        assert_eq!(request.method(), "setLed");
        assert_eq!(params_value(&request), json!({"band": "A", "red": true, "green": true, "blue": false}));
    }

    #[test]
    fn global_precision_has_no_band() {
        let request = EngineRequest::SetRequiredGesturePrecisionName {
            band: None,
            precision: "HIGH".to_string(),
        };
        assert_eq!(params_value(&request), json!({"precision": "HIGH"}));
    }

    #[test]
    fn parameterless_requests_send_no_params() {
        assert_eq!(EngineRequest::ConnectStrongest.params(), Params::None);
        assert_eq!(EngineRequest::GetBands.method(), "getBands");
        assert_eq!(
            params_value(&EngineRequest::SetActivationState { band: "A".to_string(), active: true }),
            json!({"band": "A", "state": true})
        );
    }

    #[test]
    fn version_results() {
        assert_eq!(version_string(&json!("2.1.0")), Some("2.1.0".to_string()));
        assert_eq!(version_string(&json!({"major": 2})), Some("{\"major\":2}".to_string()));
        assert_eq!(version_string(&Value::Null), None);
    }
}
