//! HiTechnic NXT Sensor Multiplexer.
//!
//! In run mode the multiplexer polls up to four attached sensors and exposes
//! each of them as a child input port (`<port>:mux1` .. `<port>:mux4`).
//! Detect mode auto-detects attached sensors and may only be entered from
//! halt mode.

use super::{HookContext, SensorHooks, SubDevices};
use crate::errors::{SensorError, SensorResult};
use crate::ports::{PortBatch, PortDescriptor, PortHandle, PortKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const NUM_CHANNELS: usize = 4;

// Register map
pub const COMMAND_REG: u8 = 0x20;
pub const STATUS_REG: u8 = 0x21;
pub const CH1_CONFIG_REG: u8 = 0x22;
pub const CH2_CONFIG_REG: u8 = 0x27;
pub const CH3_CONFIG_REG: u8 = 0x2C;
pub const CH4_CONFIG_REG: u8 = 0x31;
pub const CH1_ANALOG_REG: u8 = 0x36;
pub const CH1_I2C_DATA_REG: u8 = 0x40;
pub const CH2_I2C_DATA_REG: u8 = 0x50;
pub const CH3_I2C_DATA_REG: u8 = 0x60;
pub const CH4_I2C_DATA_REG: u8 = 0x70;

// Command register values, which are also the mode indices' set_mode data
pub const COMMAND_HALT: u8 = 0;
pub const COMMAND_DETECT: u8 = 1;
pub const COMMAND_RUN: u8 = 2;

// Mode indices in the table
pub const MODE_RUN: usize = 0;
pub const MODE_DETECT: usize = 1;
pub const MODE_HALT: usize = 2;
pub const MODE_NAMES: [&str; 3] = ["HT-SMUX-RUN", "HT-SMUX-DETECT", "HT-SMUX-HALT"];

// Status register bits
pub const STATUS_BATTERY_LOW: u8 = 1 << 0;
pub const STATUS_RUNNING: u8 = 1 << 1;
pub const STATUS_HALT: u8 = 1 << 2;
pub const STATUS_ERROR: u8 = 1 << 3;

/// Channel config bit: an I2C sensor is attached
pub const CONFIG_I2C: u8 = 1 << 3;

/// Size of one per-channel I2C data block
pub const I2C_DATA_LEN: usize = 16;
/// Status block, channels 1-2 I2C data, channels 3-4 I2C data
pub const RAW_LEN: usize = 96;

const CONFIG_REGS: [u8; NUM_CHANNELS] = [CH1_CONFIG_REG, CH2_CONFIG_REG, CH3_CONFIG_REG, CH4_CONFIG_REG];

/// Snapshot of one channel taken from the multiplexer's poll buffer
#[derive(Debug, Clone, Copy)]
pub struct ChannelFrame<'a> {
    channel: usize,
    raw: &'a [u8],
}

impl<'a> ChannelFrame<'a> {
    /// `None` unless `channel` is one of the four inputs
    pub fn new(channel: usize, raw: &'a [u8]) -> Option<Self> {
        (channel < NUM_CHANNELS).then_some(Self { channel, raw })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    fn at(&self, reg: u8) -> u8 {
        self.raw
            .get((reg - COMMAND_REG) as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn config(&self) -> u8 {
        self.at(CONFIG_REGS[self.channel])
    }

    pub fn has_i2c_sensor(&self) -> bool {
        self.config() & CONFIG_I2C != 0
    }

    /// 10-bit analog value: upper 8 bits, then the lower 2 bits
    pub fn analog(&self) -> u16 {
        let reg = CH1_ANALOG_REG + 2 * self.channel as u8;
        ((self.at(reg) as u16) << 2) | (self.at(reg + 1) as u16 & 0x03)
    }

    /// The channel's I2C data block, empty when it was not read this tick
    pub fn i2c_data(&self) -> &'a [u8] {
        let start = 32 + self.channel * I2C_DATA_LEN;
        self.raw.get(start..start + I2C_DATA_LEN).unwrap_or(&[])
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }
}

/// Callback attached to one channel port, run after every poll tick
pub type ChannelPollCallback = Arc<dyn Fn(&ChannelFrame<'_>) + Send + Sync>;

/// Child input port of the multiplexer
pub struct MuxChannel {
    index: usize,
    name: String,
    handle: PortHandle,
    callback: Option<ChannelPollCallback>,
}

impl MuxChannel {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> PortHandle {
        self.handle
    }

    pub fn set_callback(&mut self, callback: ChannelPollCallback) {
        self.callback = Some(callback);
    }
}

impl fmt::Debug for MuxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxChannel")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

pub struct HtSmuxHooks;

pub static HT_SMUX_HOOKS: HtSmuxHooks = HtSmuxHooks;

impl HtSmuxHooks {
    fn register_channels(ctx: &mut HookContext<'_>) -> SensorResult<Vec<MuxChannel>> {
        let mut batch = PortBatch::new(ctx.ports);
        for index in 0..NUM_CHANNELS {
            let descriptor = PortDescriptor {
                kind: PortKind::MuxInput,
                channel: index,
                address: ctx.address,
            };
            batch
                .register(
                    format!("{}:mux{}", ctx.port_name, index + 1),
                    ctx.port_name,
                    descriptor,
                    |handle, name| MuxChannel {
                        index,
                        name,
                        handle,
                        callback: None,
                    },
                )
                .map_err(|source| SensorError::Registration {
                    sensor: ctx.sensor_id.to_string(),
                    source,
                })?;
        }
        Ok(batch.commit())
    }
}

#[async_trait]
impl SensorHooks for HtSmuxHooks {
    async fn pre_switch(&self, ctx: &mut HookContext<'_>, mode: usize) -> SensorResult<()> {
        let status = ctx.read_byte(STATUS_REG).await?;
        if mode == MODE_DETECT && status & STATUS_HALT == 0 {
            return Err(SensorError::InvalidTransition {
                sensor: ctx.sensor_id.to_string(),
                mode: MODE_NAMES[MODE_DETECT].to_string(),
                reason: "multiplexer must be halted before auto-detection".to_string(),
            });
        }

        let command = ctx.read_byte(COMMAND_REG).await?;
        if command == COMMAND_DETECT {
            return Err(SensorError::InvalidTransition {
                sensor: ctx.sensor_id.to_string(),
                mode: MODE_NAMES.get(mode).copied().unwrap_or("?").to_string(),
                reason: "auto-detection is in progress".to_string(),
            });
        }
        Ok(())
    }

    async fn post_switch(&self, ctx: &mut HookContext<'_>, mode: usize) -> SensorResult<()> {
        let has_channels = matches!(ctx.sub_devices, SubDevices::MuxChannels(_));

        if mode == MODE_RUN && !has_channels {
            let channels = Self::register_channels(ctx)?;
            info!("[{}] registered {} multiplexer channel(s)", ctx.sensor_id, channels.len());
            *ctx.sub_devices = SubDevices::MuxChannels(channels);
        } else if mode != MODE_RUN && has_channels {
            ctx.sub_devices.release(ctx.ports);
            info!("[{}] multiplexer channels released", ctx.sensor_id);
        }
        Ok(())
    }

    async fn read_extra(&self, ctx: &mut HookContext<'_>, _mode: usize, raw: &mut Vec<u8>) -> SensorResult<()> {
        raw.resize(RAW_LEN, 0);
        let i2c_on = |reg: u8| raw[(reg - COMMAND_REG) as usize] & CONFIG_I2C != 0;
        let low_pair = i2c_on(CH1_CONFIG_REG) || i2c_on(CH2_CONFIG_REG);
        let high_pair = i2c_on(CH3_CONFIG_REG) || i2c_on(CH4_CONFIG_REG);

        if low_pair {
            ctx.read_block(CH1_I2C_DATA_REG, &mut raw[32..64]).await?;
        } else {
            raw[32..64].fill(0);
        }
        if high_pair {
            ctx.read_block(CH3_I2C_DATA_REG, &mut raw[64..96]).await?;
        } else {
            raw[64..96].fill(0);
        }
        debug!(
            "[{}] multiplexer extra reads: ch1-2={} ch3-4={}",
            ctx.sensor_id, low_pair, high_pair
        );
        Ok(())
    }

    async fn on_poll(&self, ctx: &mut HookContext<'_>, _mode: usize, raw: &[u8]) {
        if let SubDevices::MuxChannels(channels) = &*ctx.sub_devices {
            for channel in channels {
                if let (Some(callback), Some(frame)) = (&channel.callback, ChannelFrame::new(channel.index, raw)) {
                    callback(&frame);
                }
            }
        }
    }

    async fn on_remove(&self, ctx: &mut HookContext<'_>) {
        if matches!(ctx.sub_devices, SubDevices::MuxChannels(_)) {
            ctx.sub_devices.release(ctx.ports);
        }
    }
}
