use thiserror::Error;

#[cfg(target_os = "linux")]
use i2cdev::linux::LinuxI2CError;

/// Bus-level failures reported by an `I2cTransport`
#[derive(Error, Debug)]
pub enum TransportError {
    #[cfg(target_os = "linux")]
    #[error("I2C communication failed: {0}")]
    I2c(#[from] LinuxI2CError),

    #[error("No acknowledgment from device {address:#04x} at register {register:#04x}")]
    Nack { address: u8, register: u8 },

    #[error("Block transfer of {len} bytes exceeds the {max}-byte SMBus limit")]
    BlockTooLarge { len: usize, max: usize },

    #[error("Short read from register {register:#04x}: expected {expected} bytes, got {actual}")]
    ShortRead {
        register: u8,
        expected: usize,
        actual: usize,
    },

    #[error("I2C not supported on this platform: {0}")]
    Unsupported(String),
}

/// Failures of the platform port (child device) registration subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("No free port handles (limit {limit})")]
    Exhausted { limit: usize },

    #[error("Port name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Unknown port handle {0}")]
    UnknownHandle(u32),

    #[error("Port registration rejected: {0}")]
    Rejected(String),
}

/// Errors raised by the mode/lifecycle engine of a sensor instance
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("I2C transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Sensor '{sensor}' refused mode '{mode}': {reason}")]
    InvalidTransition {
        sensor: String,
        mode: String,
        reason: String,
    },

    #[error("Sub-device registration for '{sensor}' failed: {source}")]
    Registration {
        sensor: String,
        #[source]
        source: PortError,
    },

    #[error("Invalid sensor configuration for '{sensor}': {reason}")]
    Configuration { sensor: String, reason: String },

    #[error("Sensor '{sensor}' has no mode '{mode}'")]
    UnknownMode { sensor: String, mode: String },

    #[error("Mode '{mode}' of sensor '{sensor}' is not user-selectable")]
    NotSelectable { sensor: String, mode: String },

    #[error("Sensor '{sensor}' has no {kind} sub-device {index}")]
    NoSubDevices {
        sensor: String,
        kind: &'static str,
        index: usize,
    },

    #[error("Sub-device '{name}' has been released")]
    SubDeviceReleased { name: String },

    #[error("Sensor '{sensor}' has been removed")]
    Removed { sensor: String },

    #[error("Sensor '{sensor}' has no active mode")]
    NotActive { sensor: String },

    #[error("Unsupported sensor driver: '{driver}'")]
    UnsupportedDriver { driver: String },

    #[error("Bus '{bus}' not found or unavailable")]
    BusNotFound { bus: String },

    #[error("Sensor '{sensor}' probe failed: {reason}")]
    Probe { sensor: String, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Registry and initialization errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Sensor registration failed: {0}")]
    RegistrationError(#[source] SensorError),

    #[error("Bus initialization failed: {0}")]
    BusInitError(#[from] ConfigError),

    #[error("Failed to create sensor driver: {0}")]
    DriverCreationError(#[source] SensorError),

    #[error("A sensor is already registered on bus '{bus}' at address {address:#04x}")]
    DuplicateAddress { bus: String, address: u8 },

    #[error("Resource cleanup failed: {reason}")]
    CleanupError { reason: String },
}

/// Result type aliases for convenience
pub type TransportResult<T> = Result<T, TransportError>;
pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
