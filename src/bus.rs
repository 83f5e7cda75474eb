pub mod i2c;
pub mod mock;

use crate::errors::TransportResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Largest payload a single SMBus block transfer may carry
pub const MAX_BLOCK_LEN: usize = 32;

/// Register-level access to devices on one I2C bus.
///
/// Every call is a single atomic bus transaction. Implementations own their
/// timeout/retry policy; callers treat any error as an immediate failure.
#[async_trait]
pub trait I2cTransport: Send {
    async fn read_byte(&mut self, address: u8, reg: u8) -> TransportResult<u8>;

    /// SMBus word read, low byte first on the wire
    async fn read_word(&mut self, address: u8, reg: u8) -> TransportResult<u16>;

    /// Reads up to `buf.len()` (at most [`MAX_BLOCK_LEN`]) bytes starting at `reg`.
    /// Returns the number of bytes actually transferred.
    async fn read_block(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> TransportResult<usize>;

    async fn write_byte(&mut self, address: u8, reg: u8, value: u8) -> TransportResult<()>;

    async fn write_word(&mut self, address: u8, reg: u8, value: u16) -> TransportResult<()>;
}

/// A bus shared by every sensor attached to it
pub type SharedBus = Arc<Mutex<dyn I2cTransport>>;

/// Bus type enum for the supported transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    I2C,
    Mock,
}

impl BusType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i2c" => Some(BusType::I2C),
            "mock" => Some(BusType::Mock),
            _ => None,
        }
    }
}
