pub mod catalog;
pub mod decode;
pub mod mode;

#[cfg(feature = "ht_smux")]
pub mod ht_smux;
#[cfg(feature = "ms_servo")]
pub mod ms_servo;

use crate::bus::{I2cTransport, SharedBus};
use crate::errors::{SensorResult, TransportResult};
use crate::ports::PortRegistrar;
use async_trait::async_trait;

pub use catalog::{find_sensor_info, identify, read_identity, DeviceIdentity, SENSOR_DEFS};
pub use decode::{decode, ModeValues, ScaledValue};
pub use mode::{DataType, ModeInfo, PinState, SensorInfo, SetMode};

/// Everything a lifecycle hook may touch while the instance lock is held
pub struct HookContext<'a> {
    pub sensor_id: &'a str,
    /// Port name of the parent, used to derive sub-device names
    pub port_name: &'a str,
    pub address: u8,
    /// The locked bus
    pub bus: &'a mut dyn I2cTransport,
    /// Handle of the same bus, for sub-devices that outlive this call
    pub shared_bus: &'a SharedBus,
    pub ports: &'a dyn PortRegistrar,
    pub sub_devices: &'a mut SubDevices,
    pub poll_ms: &'a mut u64,
}

impl HookContext<'_> {
    pub async fn read_byte(&mut self, reg: u8) -> TransportResult<u8> {
        self.bus.read_byte(self.address, reg).await
    }

    /// Reads exactly `buf.len()` bytes (at most one SMBus block)
    pub async fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> TransportResult<()> {
        let n = self.bus.read_block(self.address, reg, buf).await?;
        if n < buf.len() {
            return Err(crate::errors::TransportError::ShortRead {
                register: reg,
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }
}

/// Per-model lifecycle hooks.
///
/// Every method defaults to a no-op, so a model only implements the
/// capabilities it needs.
#[async_trait]
pub trait SensorHooks: Send + Sync {
    /// Runs before any register write of a mode switch. An error vetoes the switch.
    async fn pre_switch(&self, _ctx: &mut HookContext<'_>, _mode: usize) -> SensorResult<()> {
        Ok(())
    }

    /// Runs after the new mode index is committed
    async fn post_switch(&self, _ctx: &mut HookContext<'_>, _mode: usize) -> SensorResult<()> {
        Ok(())
    }

    /// Extra reads that depend on the freshly read payload
    async fn read_extra(&self, _ctx: &mut HookContext<'_>, _mode: usize, _raw: &mut Vec<u8>) -> SensorResult<()> {
        Ok(())
    }

    /// Fans a completed poll out to dependents
    async fn on_poll(&self, _ctx: &mut HookContext<'_>, _mode: usize, _raw: &[u8]) {}

    async fn on_probe(&self, _ctx: &mut HookContext<'_>) -> SensorResult<()> {
        Ok(())
    }

    /// Best-effort teardown; must release every sub-device it can
    async fn on_remove(&self, _ctx: &mut HookContext<'_>) {}
}

/// Sub-devices currently owned by a sensor instance
#[derive(Debug, Default)]
pub enum SubDevices {
    #[default]
    None,
    #[cfg(feature = "ht_smux")]
    MuxChannels(Vec<ht_smux::MuxChannel>),
    #[cfg(feature = "ms_servo")]
    Servos(Vec<std::sync::Arc<ms_servo::ServoChannel>>),
}

impl SubDevices {
    /// Unregisters every sub-device, continuing past failures
    pub fn release(&mut self, ports: &dyn PortRegistrar) {
        match std::mem::take(self) {
            SubDevices::None => {}
            #[cfg(feature = "ht_smux")]
            SubDevices::MuxChannels(channels) => {
                crate::ports::release_all(ports, channels.iter().map(|c| (c.handle(), c.name())));
            }
            #[cfg(feature = "ms_servo")]
            SubDevices::Servos(servos) => {
                for servo in &servos {
                    servo.mark_released();
                }
                crate::ports::release_all(ports, servos.iter().map(|s| (s.handle(), s.name())));
            }
        }
    }
}
