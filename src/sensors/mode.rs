use super::SensorHooks;
use crate::bus::MAX_BLOCK_LEN;
use crate::errors::{ConfigError, ConfigResult};
use std::collections::HashSet;
use std::fmt;

/// Largest logical payload a mode may declare; several block reads tile it
pub const MAX_PAYLOAD_LEN: usize = 4 * MAX_BLOCK_LEN;
/// Number of addressable registers on a device
pub const REGISTER_SPACE: usize = 256;

/// Encoding of one raw scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    S8,
    /// Little-endian
    U16,
    /// Little-endian
    S16,
    S16Be,
    /// Little-endian
    U32,
    /// Little-endian
    S32,
}

impl DataType {
    pub const fn width(self) -> usize {
        match self {
            DataType::U8 | DataType::S8 => 1,
            DataType::U16 | DataType::S16 | DataType::S16Be => 2,
            DataType::U32 | DataType::S32 => 4,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, DataType::S8 | DataType::S16 | DataType::S16Be | DataType::S32)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::U8 => "u8",
            DataType::S8 => "s8",
            DataType::U16 => "u16",
            DataType::S16 => "s16",
            DataType::S16Be => "s16_be",
            DataType::U32 => "u32",
            DataType::S32 => "s32",
        };
        f.write_str(s)
    }
}

/// State of the input port's pin 1 while a mode is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    High,
    Low,
    Float,
}

/// Register write that puts the device into a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetMode {
    pub reg: u8,
    pub value: u8,
}

/// One operating mode of a sensor model
#[derive(Debug, Clone, Copy)]
pub struct ModeInfo {
    pub name: &'static str,
    pub units: &'static str,
    pub data_type: DataType,
    pub data_sets: usize,
    pub raw_min: i32,
    pub raw_max: i32,
    pub pct_min: i32,
    pub pct_max: i32,
    pub si_min: i32,
    pub si_max: i32,
    pub decimals: u8,
    pub figures: u8,
    pub read_reg: u8,
    pub read_len: Option<usize>,
    pub set_mode: Option<SetMode>,
    pub pin1_state: Option<PinState>,
}

impl ModeInfo {
    /// A mode with the table defaults: one unsigned byte, raw 0..255,
    /// percent 0..100, SI 0..255, five figures, no decimals.
    pub const fn new(name: &'static str, read_reg: u8) -> Self {
        Self {
            name,
            units: "",
            data_type: DataType::U8,
            data_sets: 1,
            raw_min: 0,
            raw_max: 255,
            pct_min: 0,
            pct_max: 100,
            si_min: 0,
            si_max: 255,
            decimals: 0,
            figures: 5,
            read_reg,
            read_len: None,
            set_mode: None,
            pin1_state: None,
        }
    }

    pub const fn units(self, units: &'static str) -> Self {
        Self { units, ..self }
    }

    pub const fn data(self, data_type: DataType, data_sets: usize) -> Self {
        Self {
            data_type,
            data_sets,
            ..self
        }
    }

    pub const fn raw(self, raw_min: i32, raw_max: i32) -> Self {
        Self {
            raw_min,
            raw_max,
            ..self
        }
    }

    pub const fn pct(self, pct_min: i32, pct_max: i32) -> Self {
        Self {
            pct_min,
            pct_max,
            ..self
        }
    }

    pub const fn si(self, si_min: i32, si_max: i32) -> Self {
        Self { si_min, si_max, ..self }
    }

    pub const fn decimals(self, decimals: u8) -> Self {
        Self { decimals, ..self }
    }

    pub const fn figures(self, figures: u8) -> Self {
        Self { figures, ..self }
    }

    pub const fn set_mode(self, reg: u8, value: u8) -> Self {
        Self {
            set_mode: Some(SetMode { reg, value }),
            ..self
        }
    }

    pub const fn pin1(self, state: PinState) -> Self {
        Self {
            pin1_state: Some(state),
            ..self
        }
    }

    /// Reads a fixed register block instead of `width × data_sets` bytes
    pub const fn read_len(self, len: usize) -> Self {
        Self {
            read_len: Some(len),
            ..self
        }
    }

    /// Bytes occupied by the decoded values
    pub const fn value_len(&self) -> usize {
        self.data_type.width() * self.data_sets
    }

    /// Bytes read from `read_reg` on every poll tick
    pub const fn payload_len(&self) -> usize {
        match self.read_len {
            Some(len) => len,
            None => self.value_len(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "mode.name".to_string(),
            });
        }
        if self.data_sets == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.data_sets", self.name),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.raw_min == self.raw_max {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.raw_max", self.name),
                reason: format!("raw range is empty ({} == {})", self.raw_min, self.raw_max),
            });
        }
        if self.payload_len() < self.value_len() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.read_len", self.name),
                reason: format!(
                    "payload of {} bytes cannot hold {} x {}",
                    self.payload_len(),
                    self.data_sets,
                    self.data_type
                ),
            });
        }
        if self.payload_len() > MAX_PAYLOAD_LEN {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.read_len", self.name),
                reason: format!(
                    "payload of {} bytes exceeds {} bytes",
                    self.payload_len(),
                    MAX_PAYLOAD_LEN
                ),
            });
        }
        if self.read_reg as usize + self.payload_len() > REGISTER_SPACE {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.read_len", self.name),
                reason: format!(
                    "payload of {} bytes at {:#04x} runs past the last register",
                    self.payload_len(),
                    self.read_reg
                ),
            });
        }
        Ok(())
    }
}

/// Mode table and lifecycle hooks of one sensor model
pub struct SensorInfo {
    /// Driver name, also used for lookup from configuration
    pub name: &'static str,
    pub vendor_id: &'static str,
    pub product_id: &'static str,
    pub modes: &'static [ModeInfo],
    /// Modes at or beyond this index cannot be selected by name
    pub read_only_count: Option<usize>,
    pub slow: bool,
    pub hooks: Option<&'static dyn SensorHooks>,
}

impl SensorInfo {
    pub fn num_modes(&self) -> usize {
        self.modes.len()
    }

    pub fn user_mode_count(&self) -> usize {
        self.read_only_count.unwrap_or(self.modes.len()).min(self.modes.len())
    }

    pub fn mode(&self, index: usize) -> Option<&ModeInfo> {
        self.modes.get(index)
    }

    pub fn mode_index(&self, name: &str) -> Option<usize> {
        self.modes.iter().position(|m| m.name == name)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "sensor.name".to_string(),
            });
        }
        if self.modes.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "sensor '{}' declares no modes",
                self.name
            )));
        }
        if let Some(count) = self.read_only_count {
            if count == 0 || count > self.modes.len() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.read_only_count", self.name),
                    reason: format!("must be within 1..={}", self.modes.len()),
                });
            }
        }

        let mut seen = HashSet::new();
        for mode in self.modes {
            mode.validate()?;
            if !seen.insert(mode.name) {
                return Err(ConfigError::ValidationError(format!(
                    "sensor '{}' declares mode '{}' twice",
                    self.name, mode.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorInfo")
            .field("name", &self.name)
            .field("vendor_id", &self.vendor_id)
            .field("product_id", &self.product_id)
            .field("modes", &self.modes.len())
            .field("read_only_count", &self.read_only_count)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}
