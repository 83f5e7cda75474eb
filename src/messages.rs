use crate::sensors::{ModeValues, ScaledValue};
use serde::{Deserialize, Serialize};

/// Current message schema version
pub const SCHEMA_VERSION: u16 = 1;

/// Header metadata common to all published readings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Header {
    /// Identifier of the hub that produced the reading
    pub device_id: String,
    /// Sensor identifier from the configuration (e.g., "sonar0", "smux")
    pub sensor_id: String,
    /// Sequence number for message ordering, per sensor
    pub seq: u64,
    /// UTC timestamp in nanoseconds
    pub t_utc_ns: u64,
    /// Message schema version for evolution
    pub schema_v: u16,
}

impl Header {
    /// Create a new header stamped with the current time
    pub fn new(device_id: String, sensor_id: String, seq: u64) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now_utc = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        Self {
            device_id,
            sensor_id,
            seq,
            t_utc_ns: now_utc,
            schema_v: SCHEMA_VERSION,
        }
    }
}

/// One decoded reading of a sensor in its current mode
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ValueMessage {
    pub h: Header,
    /// Driver (table) name
    pub driver: String,
    pub mode: String,
    pub units: String,
    pub decimals: u8,
    pub figures: u8,
    pub values: Vec<ScaledValue>,
}

impl ValueMessage {
    pub fn new(h: Header, driver: &str, reading: ModeValues) -> Self {
        Self {
            h,
            driver: driver.to_string(),
            mode: reading.mode,
            units: reading.units,
            decimals: reading.decimals,
            figures: reading.figures,
            values: reading.values,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.h.sensor_id
    }

    /// SI values with the implied decimal point applied
    pub fn si_values(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.si_value(self.decimals)).collect()
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> ModeValues {
        ModeValues {
            mode: "NXT-US-IN".to_string(),
            units: "in".to_string(),
            decimals: 1,
            figures: 5,
            values: vec![ScaledValue {
                raw: 51,
                percent: 20.0,
                si: 200.0,
            }],
        }
    }

    #[test]
    fn test_header_creation() {
        let header = Header::new("test_hub".to_string(), "sonar0".to_string(), 42);

        assert_eq!(header.device_id, "test_hub");
        assert_eq!(header.sensor_id, "sonar0");
        assert_eq!(header.seq, 42);
        assert_eq!(header.schema_v, SCHEMA_VERSION);
        assert!(header.t_utc_ns > 0);
    }

    #[test]
    fn test_value_message_serialization() {
        let header = Header::new("test".to_string(), "sonar0".to_string(), 1);
        let msg = ValueMessage::new(header, "lego-nxt-ultrasonic", reading());

        assert_eq!(msg.si_values(), vec![20.0]);

        let json = msg.to_json().unwrap();
        assert!(json.contains("sonar0"));
        assert!(json.contains("NXT-US-IN"));

        let decoded: ValueMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }
}
