//! In-memory I2C bus.
//!
//! Serves register reads from a per-device register map, records every
//! transaction and supports failure injection. Used by the test-suite and by
//! `type = "mock"` buses for dry runs without hardware.

use super::{I2cTransport, MAX_BLOCK_LEN};
use crate::errors::{TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// Records operations performed on the mock bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    ReadByte { address: u8, reg: u8 },
    ReadWord { address: u8, reg: u8 },
    ReadBlock { address: u8, reg: u8, len: usize },
    WriteByte { address: u8, reg: u8, value: u8 },
    WriteWord { address: u8, reg: u8, value: u16 },
}

#[derive(Debug, Default)]
pub struct MockBus {
    /// Simulated register values (device address, register) -> value
    registers: HashMap<(u8, u8), u8>,

    /// Operations log for verification
    operations: Vec<BusOp>,

    /// Failure injection
    fail_next_read: bool,
    fail_next_write: bool,
    failing_registers: Vec<u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, address: u8, reg: u8, value: u8) {
        self.registers.insert((address, reg), value);
    }

    /// Writes `data` to consecutive registers starting at `reg`
    pub fn set_registers(&mut self, address: u8, reg: u8, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.set_register(address, reg.wrapping_add(i as u8), *byte);
        }
    }

    /// Writes a NUL padded identification string to consecutive registers
    pub fn set_string(&mut self, address: u8, reg: u8, value: &str, len: usize) {
        let mut data = vec![0u8; len];
        let n = value.len().min(len);
        data[..n].copy_from_slice(&value.as_bytes()[..n]);
        self.set_registers(address, reg, &data);
    }

    pub fn register(&self, address: u8, reg: u8) -> u8 {
        self.registers.get(&(address, reg)).copied().unwrap_or(0)
    }

    pub fn operations(&self) -> &[BusOp] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Block reads issued so far, as (register, length) pairs
    pub fn block_reads(&self) -> Vec<(u8, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                BusOp::ReadBlock { reg, len, .. } => Some((*reg, *len)),
                _ => None,
            })
            .collect()
    }

    /// Byte and word writes issued so far, as (register, value) pairs
    pub fn writes(&self) -> Vec<(u8, u16)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                BusOp::WriteByte { reg, value, .. } => Some((*reg, *value as u16)),
                BusOp::WriteWord { reg, value, .. } => Some((*reg, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_read(&mut self) {
        self.fail_next_read = true;
    }

    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Every transfer touching `reg` fails until [`MockBus::heal`] is called
    pub fn fail_register(&mut self, reg: u8) {
        self.failing_registers.push(reg);
    }

    pub fn heal(&mut self) {
        self.fail_next_read = false;
        self.fail_next_write = false;
        self.failing_registers.clear();
    }

    fn check_read(&mut self, address: u8, reg: u8) -> TransportResult<()> {
        if self.fail_next_read || self.failing_registers.contains(&reg) {
            self.fail_next_read = false;
            return Err(TransportError::Nack { address, register: reg });
        }
        Ok(())
    }

    fn check_write(&mut self, address: u8, reg: u8) -> TransportResult<()> {
        if self.fail_next_write || self.failing_registers.contains(&reg) {
            self.fail_next_write = false;
            return Err(TransportError::Nack { address, register: reg });
        }
        Ok(())
    }
}

#[async_trait]
impl I2cTransport for MockBus {
    async fn read_byte(&mut self, address: u8, reg: u8) -> TransportResult<u8> {
        self.operations.push(BusOp::ReadByte { address, reg });
        self.check_read(address, reg)?;
        Ok(self.register(address, reg))
    }

    async fn read_word(&mut self, address: u8, reg: u8) -> TransportResult<u16> {
        self.operations.push(BusOp::ReadWord { address, reg });
        self.check_read(address, reg)?;
        let lo = self.register(address, reg);
        let hi = self.register(address, reg.wrapping_add(1));
        Ok(u16::from_le_bytes([lo, hi]))
    }

    async fn read_block(&mut self, address: u8, reg: u8, buf: &mut [u8]) -> TransportResult<usize> {
        self.operations.push(BusOp::ReadBlock {
            address,
            reg,
            len: buf.len(),
        });
        if buf.len() > MAX_BLOCK_LEN {
            return Err(TransportError::BlockTooLarge {
                len: buf.len(),
                max: MAX_BLOCK_LEN,
            });
        }
        self.check_read(address, reg)?;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.register(address, reg.wrapping_add(i as u8));
        }
        Ok(buf.len())
    }

    async fn write_byte(&mut self, address: u8, reg: u8, value: u8) -> TransportResult<()> {
        self.operations.push(BusOp::WriteByte { address, reg, value });
        self.check_write(address, reg)?;
        self.set_register(address, reg, value);
        Ok(())
    }

    async fn write_word(&mut self, address: u8, reg: u8, value: u16) -> TransportResult<()> {
        self.operations.push(BusOp::WriteWord { address, reg, value });
        self.check_write(address, reg)?;
        let [lo, hi] = value.to_le_bytes();
        self.set_register(address, reg, lo);
        self.set_register(address, reg.wrapping_add(1), hi);
        Ok(())
    }
}
