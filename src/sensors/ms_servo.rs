//! mindsensors.com 8-channel servo controller.
//!
//! The controller itself only reports its battery voltage. Each of its eight
//! outputs is exposed as a servo channel sub-device registered at probe time.

use super::{HookContext, SensorHooks, SubDevices};
use crate::bus::SharedBus;
use crate::errors::{SensorError, SensorResult};
use crate::ports::{PortBatch, PortDescriptor, PortHandle, PortKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NUM_SERVOS: usize = 8;

/// Position word of servo 0; servo `i` is at `POSITION_REG + 2 * i`
pub const POSITION_REG: u8 = 0x42;
/// Rate divisor byte of servo 0; servo `i` is at `RATE_REG + i`
pub const RATE_REG: u8 = 0x52;

/// Clock the rate divisor applies to
pub const RATE_CLOCK: u32 = 24000;
/// Smallest rate whose divisor still fits in one byte
pub const MIN_RATE: u32 = 94;

/// Poll interval the controller starts with
pub const DEFAULT_POLL_MS: u64 = 1000;

/// Divisor stored for a requested rate. 0 means unset.
pub fn rate_to_divisor(rate: u32) -> u8 {
    if rate >= RATE_CLOCK {
        1
    } else if rate < MIN_RATE {
        0
    } else {
        (RATE_CLOCK / rate) as u8
    }
}

/// Rate reported for a stored divisor
pub fn divisor_to_rate(divisor: u8) -> u32 {
    if divisor == 0 {
        0
    } else {
        RATE_CLOCK / divisor as u32
    }
}

/// One servo output of the controller
pub struct ServoChannel {
    index: usize,
    name: String,
    handle: PortHandle,
    address: u8,
    bus: SharedBus,
    released: AtomicBool,
}

impl ServoChannel {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> PortHandle {
        self.handle
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::Release);
    }

    fn position_reg(&self) -> u8 {
        POSITION_REG + 2 * self.index as u8
    }

    fn rate_reg(&self) -> u8 {
        RATE_REG + self.index as u8
    }

    /// Call with the bus lock held; teardown marks channels released under it
    fn ensure_live(&self) -> SensorResult<()> {
        if self.is_released() {
            return Err(SensorError::SubDeviceReleased {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub async fn get_position(&self) -> SensorResult<u16> {
        let mut bus = self.bus.lock().await;
        self.ensure_live()?;
        Ok(bus.read_word(self.address, self.position_reg()).await?)
    }

    pub async fn set_position(&self, value: u16) -> SensorResult<()> {
        let mut bus = self.bus.lock().await;
        self.ensure_live()?;
        bus.write_word(self.address, self.position_reg(), value).await?;
        debug!("[{}] position set to {}", self.name, value);
        Ok(())
    }

    pub async fn get_rate(&self) -> SensorResult<u32> {
        let mut bus = self.bus.lock().await;
        self.ensure_live()?;
        let divisor = bus.read_byte(self.address, self.rate_reg()).await?;
        Ok(divisor_to_rate(divisor))
    }

    pub async fn set_rate(&self, rate: u32) -> SensorResult<()> {
        let divisor = rate_to_divisor(rate);
        let mut bus = self.bus.lock().await;
        self.ensure_live()?;
        bus.write_byte(self.address, self.rate_reg(), divisor).await?;
        debug!("[{}] rate {} stored as divisor {}", self.name, rate, divisor);
        Ok(())
    }
}

impl fmt::Debug for ServoChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServoChannel")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("address", &self.address)
            .field("released", &self.is_released())
            .finish()
    }
}

pub struct MsServoHooks;

pub static MS_SERVO_HOOKS: MsServoHooks = MsServoHooks;

#[async_trait]
impl SensorHooks for MsServoHooks {
    async fn on_probe(&self, ctx: &mut HookContext<'_>) -> SensorResult<()> {
        let mut batch = PortBatch::new(ctx.ports);
        for index in 0..NUM_SERVOS {
            let descriptor = PortDescriptor {
                kind: PortKind::Servo,
                channel: index,
                address: ctx.address,
            };
            let registered = batch.register(
                format!("{}:sv{}", ctx.port_name, index + 1),
                ctx.port_name,
                descriptor,
                |handle, name| {
                    Arc::new(ServoChannel {
                        index,
                        name,
                        handle,
                        address: ctx.address,
                        bus: ctx.shared_bus.clone(),
                        released: AtomicBool::new(false),
                    })
                },
            );
            // dropping the batch rolls back; the controller stays usable
            if let Err(e) = registered {
                warn!("[{}] servo registration failed, no servo channels: {}", ctx.sensor_id, e);
                return Ok(());
            }
        }

        let servos = batch.commit();
        info!("[{}] registered {} servo channel(s)", ctx.sensor_id, servos.len());
        *ctx.sub_devices = SubDevices::Servos(servos);
        *ctx.poll_ms = DEFAULT_POLL_MS;
        Ok(())
    }

    async fn on_remove(&self, ctx: &mut HookContext<'_>) {
        if matches!(ctx.sub_devices, SubDevices::Servos(_)) {
            ctx.sub_devices.release(ctx.ports);
        }
    }
}
