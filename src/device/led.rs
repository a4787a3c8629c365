use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown LED name: {name}")]
pub struct UnknownLedName {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedColor {
    Red,
    Green,
    Blue,
    Magenta,
    Yellow,
    Cyan,
    White,
    #[default]
    Off,
}

impl LedColor {
    /// (red, green, blue) channel switches for this color.
    pub fn rgb(&self) -> (bool, bool, bool) {
        match self {
            LedColor::Red => (true, false, false),
            LedColor::Green => (false, true, false),
            LedColor::Blue => (false, false, true),
            LedColor::Magenta => (true, false, true),
            LedColor::Yellow => (true, true, false),
            LedColor::Cyan => (false, true, true),
            LedColor::White => (true, true, true),
            LedColor::Off => (false, false, false),
        }
    }
}

impl FromStr for LedColor {
    type Err = UnknownLedName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let color = match name {
            "RED" => LedColor::Red,
            "GREEN" => LedColor::Green,
            "BLUE" => LedColor::Blue,
            "MAGENTA" => LedColor::Magenta,
            "YELLOW" => LedColor::Yellow,
            "CYAN" => LedColor::Cyan,
            "WHITE" => LedColor::White,
            "OFF" | "BLACK" => LedColor::Off,
            _ => return Err(UnknownLedName { name: name.to_string() }),
        };
        Ok(color)
    }
}

/// Timing/intensity profile of a blinking LED, as understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedPattern {
    pub high_intensity: u8,
    pub low_intensity: u8,
    pub rise_time_ms: u32,
    pub high_time_ms: u32,
    pub fall_time_ms: u32,
    pub pulse_duration_ms: u32,
    pub delay_time_ms: u32,
    pub repeat_count: u8,
}

impl LedPattern {
    pub const BLINK: LedPattern = LedPattern {
        high_intensity: 31,
        low_intensity: 0,
        rise_time_ms: 200,
        high_time_ms: 400,
        fall_time_ms: 200,
        pulse_duration_ms: 1800,
        delay_time_ms: 0,
        repeat_count: 0xff,
    };

    pub const FAST_BLINK: LedPattern = LedPattern {
        high_intensity: 31,
        low_intensity: 0,
        rise_time_ms: 0,
        high_time_ms: 150,
        fall_time_ms: 0,
        pulse_duration_ms: 300,
        delay_time_ms: 0,
        repeat_count: 0xff,
    };
}

impl FromStr for LedPattern {
    type Err = UnknownLedName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "BLINK" => Ok(LedPattern::BLINK),
            "FAST_BLINK" => Ok(LedPattern::FAST_BLINK),
            _ => Err(UnknownLedName { name: name.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_names_map_to_channels() {
        assert_eq!("MAGENTA".parse::<LedColor>().unwrap().rgb(), (true, false, true));
        assert_eq!("BLACK".parse::<LedColor>().unwrap(), LedColor::Off);
        assert_eq!(LedColor::default().rgb(), (false, false, false));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "PURPLE".parse::<LedColor>(),
            Err(UnknownLedName { name: "PURPLE".to_string() })
        );
        assert!("SLOW_BLINK".parse::<LedPattern>().is_err());
    }

    #[test]
    fn blink_profile_serializes_with_engine_field_names() {
        let value = serde_json::to_value("BLINK".parse::<LedPattern>().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({
            "high_intensity": 31,
            "low_intensity": 0,
            "rise_time_ms": 200,
            "high_time_ms": 400,
            "fall_time_ms": 200,
            "pulse_duration_ms": 1800,
            "delay_time_ms": 0,
            "repeat_count": 255,
        }));
    }
}
