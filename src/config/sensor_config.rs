use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

/// Driver name that asks for identification from the device's ID registers
pub const AUTO_DRIVER: &str = "auto";

/// Root configuration struct expecting `[[sensor]]` TOML array format
#[derive(Debug, Deserialize)]
pub struct SensorConfig {
    #[serde(rename = "sensor", default)]
    pub sensors: Vec<SensorEntry>,
}

/// One sensor entry, matching each `[[sensor]]` section
#[derive(Debug, Clone, Deserialize)]
pub struct SensorEntry {
    pub id: String,
    pub driver: String,
    pub bus: String,
    pub address: u8,
    /// Parent port name used for sub-devices; defaults to the sensor id
    pub port: Option<String>,
    /// Mode entered after probe, by name
    pub mode: Option<String>,
    pub poll_ms: Option<u64>,
}

impl SensorEntry {
    pub fn port_name(&self) -> &str {
        self.port.as_deref().unwrap_or(&self.id)
    }

    pub fn is_auto(&self) -> bool {
        self.driver == AUTO_DRIVER
    }
}

impl SensorConfig {
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let parsed: SensorConfig = toml::from_str(content)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "sensor.id".to_string(),
                });
            }
            if !ids.insert(sensor.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sensor id '{}'",
                    sensor.id
                )));
            }
            if sensor.address == 0 || sensor.address > 0x7F {
                return Err(ConfigError::InvalidValue {
                    field: format!("sensor.{}.address", sensor.id),
                    reason: format!("{:#04x} is not a 7-bit device address", sensor.address),
                });
            }
        }
        Ok(())
    }
}

/// Loads config from TOML file
pub fn load_sensor_config(path: &str) -> ConfigResult<SensorConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    SensorConfig::parse(&content)
}
