use super::{I2cTransport, MAX_BLOCK_LEN};
use crate::errors::{TransportError, TransportResult};
use async_trait::async_trait;

#[cfg(target_os = "linux")]
use i2cdev::core::I2CDevice;
#[cfg(target_os = "linux")]
use i2cdev::linux::LinuxI2CDevice;

/// I2C bus implementation backed by the Linux SMBus ioctl interface
#[cfg(target_os = "linux")]
pub struct I2CBus {
    device: LinuxI2CDevice,
    path: String,
    current_address: Option<u8>,
}

#[cfg(not(target_os = "linux"))]
pub struct I2CBus {
    path: String,
}

#[cfg(target_os = "linux")]
impl I2CBus {
    pub fn new(path: &str) -> TransportResult<Self> {
        let device = LinuxI2CDevice::new(path, 0)?;
        Ok(Self {
            device,
            path: path.to_string(),
            current_address: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn select(&mut self, address: u8) -> TransportResult<()> {
        if self.current_address != Some(address) {
            self.device.set_slave_address(address as u16)?;
            self.current_address = Some(address);
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl I2cTransport for I2CBus {
    async fn read_byte(&mut self, address: u8, reg: u8) -> TransportResult<u8> {
        self.select(address)?;
        Ok(self.device.smbus_read_byte_data(reg)?)
    }

    async fn read_word(&mut self, address: u8, reg: u8) -> TransportResult<u16> {
        self.select(address)?;
        Ok(self.device.smbus_read_word_data(reg)?)
    }

    async fn read_block(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> TransportResult<usize> {
        if buf.len() > MAX_BLOCK_LEN {
            return Err(TransportError::BlockTooLarge {
                len: buf.len(),
                max: MAX_BLOCK_LEN,
            });
        }
        self.select(address)?;

        let data = self.device.smbus_read_i2c_block_data(reg, buf.len() as u8)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn write_byte(&mut self, address: u8, reg: u8, value: u8) -> TransportResult<()> {
        self.select(address)?;
        Ok(self.device.smbus_write_byte_data(reg, value)?)
    }

    async fn write_word(&mut self, address: u8, reg: u8, value: u16) -> TransportResult<()> {
        self.select(address)?;
        Ok(self.device.smbus_write_word_data(reg, value)?)
    }
}

#[cfg(not(target_os = "linux"))]
impl I2CBus {
    pub fn new(path: &str) -> TransportResult<Self> {
        Err(TransportError::Unsupported(format!(
            "cannot open '{}': I2C is only supported on Linux, use a mock bus instead",
            path
        )))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl I2cTransport for I2CBus {
    async fn read_byte(&mut self, _address: u8, _reg: u8) -> TransportResult<u8> {
        Err(TransportError::Unsupported("I2C is only supported on Linux".to_string()))
    }

    async fn read_word(&mut self, _address: u8, _reg: u8) -> TransportResult<u16> {
        Err(TransportError::Unsupported("I2C is only supported on Linux".to_string()))
    }

    async fn read_block(&mut self, _address: u8, _reg: u8, _buf: &mut [u8]) -> TransportResult<usize> {
        Err(TransportError::Unsupported("I2C is only supported on Linux".to_string()))
    }

    async fn write_byte(&mut self, _address: u8, _reg: u8, _value: u8) -> TransportResult<()> {
        Err(TransportError::Unsupported("I2C is only supported on Linux".to_string()))
    }

    async fn write_word(&mut self, _address: u8, _reg: u8, _value: u16) -> TransportResult<()> {
        Err(TransportError::Unsupported("I2C is only supported on Linux".to_string()))
    }
}
