use crate::bus::BusType;
use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

/// Root structure for loading `[[bus]]` style TOML config
#[derive(Debug, Deserialize)]
pub struct BusConfig {
    #[serde(rename = "bus")]
    pub buses: Vec<BusEntry>,
}

/// One bus entry
#[derive(Debug, Clone, Deserialize)]
pub struct BusEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String, // 'type' is a reserved word in Rust, use raw identifier
    /// Device node for `i2c` buses; ignored by `mock`
    #[serde(default)]
    pub path: String,
}

impl BusEntry {
    pub fn bus_type(&self) -> ConfigResult<BusType> {
        BusType::parse(&self.r#type).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("bus.{}.type", self.id),
            reason: format!("unknown bus type '{}'", self.r#type),
        })
    }
}

impl BusConfig {
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let parsed: BusConfig = toml::from_str(content)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut ids = HashSet::new();
        for bus in &self.buses {
            if bus.id.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "bus.id".to_string(),
                });
            }
            if !ids.insert(bus.id.as_str()) {
                return Err(ConfigError::ValidationError(format!("duplicate bus id '{}'", bus.id)));
            }
            if bus.bus_type()? == BusType::I2C && bus.path.is_empty() {
                return Err(ConfigError::MissingField {
                    field: format!("bus.{}.path", bus.id),
                });
            }
        }
        Ok(())
    }
}

/// Load bus config file
pub fn load_bus_config(path: &str) -> ConfigResult<BusConfig> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    BusConfig::parse(&content)
}
