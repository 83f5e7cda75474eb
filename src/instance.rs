//! Runtime state of one physical sensor.
//!
//! Probe, mode switches, poll ticks and removal all serialize on the
//! instance lock. Whenever both are needed the instance lock is taken before
//! the bus lock.

use crate::bus::{I2cTransport, SharedBus, MAX_BLOCK_LEN};
use crate::errors::{SensorError, SensorResult, TransportError};
use crate::ports::PortRegistrar;
use crate::sensors::{decode, HookContext, ModeInfo, ModeValues, PinState, SensorInfo, SubDevices};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

#[cfg(feature = "ht_smux")]
use crate::sensors::ht_smux::ChannelPollCallback;
#[cfg(feature = "ms_servo")]
use crate::sensors::ms_servo::ServoChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    /// Not probed yet, or removed
    Idle,
    Switching,
    Active(usize),
}

#[derive(Debug)]
struct InstanceState {
    mode: ModeState,
    values: Option<ModeValues>,
    raw: Vec<u8>,
    sub_devices: SubDevices,
    poll_ms: u64,
    removed: bool,
}

pub struct SensorInstance {
    id: String,
    port_name: String,
    address: u8,
    info: &'static SensorInfo,
    bus: SharedBus,
    ports: Arc<dyn PortRegistrar>,
    state: Mutex<InstanceState>,
    poll_tx: watch::Sender<u64>,
}

impl SensorInstance {
    pub fn new(
        id: impl Into<String>,
        port_name: impl Into<String>,
        address: u8,
        info: &'static SensorInfo,
        bus: SharedBus,
        ports: Arc<dyn PortRegistrar>,
    ) -> Self {
        let (poll_tx, _) = watch::channel(0);
        Self {
            id: id.into(),
            port_name: port_name.into(),
            address,
            info,
            bus,
            ports,
            state: Mutex::new(InstanceState {
                mode: ModeState::Idle,
                values: None,
                raw: Vec::new(),
                sub_devices: SubDevices::None,
                poll_ms: 0,
                removed: false,
            }),
            poll_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn info(&self) -> &'static SensorInfo {
        self.info
    }

    fn hook_context<'a>(
        &'a self,
        bus: &'a mut dyn I2cTransport,
        sub_devices: &'a mut SubDevices,
        poll_ms: &'a mut u64,
    ) -> HookContext<'a> {
        HookContext {
            sensor_id: &self.id,
            port_name: &self.port_name,
            address: self.address,
            bus,
            shared_bus: &self.bus,
            ports: self.ports.as_ref(),
            sub_devices,
            poll_ms,
        }
    }

    fn ensure_present(&self, state: &InstanceState) -> SensorResult<()> {
        if state.removed {
            return Err(SensorError::Removed {
                sensor: self.id.clone(),
            });
        }
        Ok(())
    }

    fn active_mode(&self, state: &InstanceState) -> SensorResult<usize> {
        self.ensure_present(state)?;
        match state.mode {
            ModeState::Active(index) => Ok(index),
            _ => Err(SensorError::NotActive {
                sensor: self.id.clone(),
            }),
        }
    }

    /// Binds the instance to the device: runs the model's probe hook, then
    /// enters mode 0. A failure tears down whatever was created.
    pub async fn probe(&self) -> SensorResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_present(state)?;
        if state.mode != ModeState::Idle {
            return Err(SensorError::Probe {
                sensor: self.id.clone(),
                reason: "already probed".to_string(),
            });
        }

        if let Some(hooks) = self.info.hooks {
            let mut bus = self.bus.lock().await;
            let mut ctx = self.hook_context(&mut *bus, &mut state.sub_devices, &mut state.poll_ms);
            hooks.on_probe(&mut ctx).await?;
        }

        if let Err(e) = self.switch_mode(state, 0).await {
            warn!("[{}] initial mode failed, tearing down: {}", self.id, e);
            self.teardown(state).await;
            return Err(SensorError::Probe {
                sensor: self.id.clone(),
                reason: e.to_string(),
            });
        }

        self.poll_tx.send_replace(state.poll_ms);
        info!(
            "[{}] probed {} at {:#04x} on {}",
            self.id, self.info.name, self.address, self.port_name
        );
        Ok(())
    }

    /// Switches to the mode at `index`. Re-requesting the current mode runs
    /// the whole sequence again.
    pub async fn request_mode(&self, index: usize) -> SensorResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_present(state)?;
        if state.mode == ModeState::Idle {
            return Err(SensorError::NotActive {
                sensor: self.id.clone(),
            });
        }
        self.switch_mode(state, index).await
    }

    /// Switches to a user-selectable mode by name
    pub async fn select_mode(&self, name: &str) -> SensorResult<()> {
        let index = self.mode_by_name(name)?;
        if index >= self.info.user_mode_count() {
            return Err(SensorError::NotSelectable {
                sensor: self.id.clone(),
                mode: name.to_string(),
            });
        }
        self.request_mode(index).await
    }

    /// Resolves any mode name, selectable or not
    pub fn mode_by_name(&self, name: &str) -> SensorResult<usize> {
        self.info.mode_index(name).ok_or_else(|| SensorError::UnknownMode {
            sensor: self.id.clone(),
            mode: name.to_string(),
        })
    }

    pub fn list_modes(&self) -> Vec<&'static str> {
        self.info.modes.iter().map(|m| m.name).collect()
    }

    pub fn user_modes(&self) -> Vec<&'static str> {
        self.info.modes[..self.info.user_mode_count()]
            .iter()
            .map(|m| m.name)
            .collect()
    }

    pub async fn mode_state(&self) -> ModeState {
        self.state.lock().await.mode
    }

    pub async fn current_mode(&self) -> Option<usize> {
        match self.state.lock().await.mode {
            ModeState::Active(index) => Some(index),
            _ => None,
        }
    }

    pub async fn current_mode_info(&self) -> Option<&'static ModeInfo> {
        let index = self.current_mode().await?;
        self.info.mode(index)
    }

    pub async fn pin1_state(&self) -> Option<PinState> {
        self.current_mode_info().await.and_then(|m| m.pin1_state)
    }

    /// Values of the last successful poll in the current mode
    pub async fn read_values(&self) -> Option<ModeValues> {
        self.state.lock().await.values.clone()
    }

    pub async fn raw_data(&self) -> Vec<u8> {
        self.state.lock().await.raw.clone()
    }

    pub async fn is_removed(&self) -> bool {
        self.state.lock().await.removed
    }

    async fn switch_mode(&self, state: &mut InstanceState, index: usize) -> SensorResult<()> {
        let mode = self.info.mode(index).ok_or_else(|| SensorError::UnknownMode {
            sensor: self.id.clone(),
            mode: index.to_string(),
        })?;

        let mut bus = self.bus.lock().await;
        let previous = std::mem::replace(&mut state.mode, ModeState::Switching);

        if let Err(e) = self.enter_mode(&mut *bus, state, index, mode).await {
            state.mode = previous;
            debug!("[{}] switch to {} aborted: {}", self.id, mode.name, e);
            return Err(e);
        }

        state.mode = ModeState::Active(index);
        state.values = None;
        state.raw.clear();
        debug!("[{}] mode {} ({}) active", self.id, index, mode.name);

        if let Some(hooks) = self.info.hooks {
            let mut ctx = self.hook_context(&mut *bus, &mut state.sub_devices, &mut state.poll_ms);
            if let Err(e) = hooks.post_switch(&mut ctx, index).await {
                warn!("[{}] post-switch effects of {} failed: {}", self.id, mode.name, e);
            }
        }
        Ok(())
    }

    async fn enter_mode(
        &self,
        bus: &mut dyn I2cTransport,
        state: &mut InstanceState,
        index: usize,
        mode: &ModeInfo,
    ) -> SensorResult<()> {
        if let Some(hooks) = self.info.hooks {
            let mut ctx = self.hook_context(bus, &mut state.sub_devices, &mut state.poll_ms);
            hooks.pre_switch(&mut ctx, index).await?;
        }
        if let Some(set) = mode.set_mode {
            bus.write_byte(self.address, set.reg, set.value).await?;
        }
        Ok(())
    }

    /// Runs one poll tick. On failure the previous values stay visible.
    pub async fn poll_once(&self) -> SensorResult<ModeValues> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let index = self.active_mode(state)?;
        let mode = self.info.mode(index).ok_or_else(|| SensorError::UnknownMode {
            sensor: self.id.clone(),
            mode: index.to_string(),
        })?;

        let mut bus = self.bus.lock().await;
        let mut raw = vec![0u8; mode.payload_len()];
        for (i, chunk) in raw.chunks_mut(MAX_BLOCK_LEN).enumerate() {
            let reg = u8::try_from(mode.read_reg as usize + i * MAX_BLOCK_LEN).map_err(|_| {
                SensorError::Configuration {
                    sensor: self.id.clone(),
                    reason: format!("{} reads past the last register", mode.name),
                }
            })?;
            let n = bus.read_block(self.address, reg, chunk).await?;
            if n < chunk.len() {
                return Err(TransportError::ShortRead {
                    register: reg,
                    expected: chunk.len(),
                    actual: n,
                }
                .into());
            }
        }

        if let Some(hooks) = self.info.hooks {
            let mut ctx = self.hook_context(&mut *bus, &mut state.sub_devices, &mut state.poll_ms);
            hooks.read_extra(&mut ctx, index, &mut raw).await?;
        }

        let values = decode(mode, &raw).ok_or_else(|| SensorError::Configuration {
            sensor: self.id.clone(),
            reason: format!(
                "{} bytes cannot hold the layout of {} ({} bytes)",
                raw.len(),
                mode.name,
                mode.value_len()
            ),
        })?;

        if let Some(hooks) = self.info.hooks {
            let mut ctx = self.hook_context(&mut *bus, &mut state.sub_devices, &mut state.poll_ms);
            hooks.on_poll(&mut ctx, index, &raw).await;
        }

        state.raw = raw;
        state.values = Some(values.clone());
        Ok(values)
    }

    pub async fn set_poll_interval(&self, ms: u64) -> SensorResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_present(&state)?;
        state.poll_ms = ms;
        self.poll_tx.send_replace(ms);
        debug!("[{}] poll interval set to {} ms", self.id, ms);
        Ok(())
    }

    /// Poll interval in milliseconds; 0 disables periodic polling
    pub fn poll_interval(&self) -> u64 {
        *self.poll_tx.borrow()
    }

    pub fn poll_interval_watch(&self) -> watch::Receiver<u64> {
        self.poll_tx.subscribe()
    }

    #[cfg(feature = "ms_servo")]
    pub async fn servo(&self, index: usize) -> SensorResult<Arc<ServoChannel>> {
        let state = self.state.lock().await;
        let servo = match &state.sub_devices {
            SubDevices::Servos(servos) => servos.get(index).cloned(),
            _ => None,
        };
        servo.ok_or_else(|| SensorError::NoSubDevices {
            sensor: self.id.clone(),
            kind: "servo",
            index,
        })
    }

    /// Port names of the sub-devices currently owned by this instance
    pub async fn sub_device_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        match &state.sub_devices {
            SubDevices::None => Vec::new(),
            #[cfg(feature = "ht_smux")]
            SubDevices::MuxChannels(channels) => channels.iter().map(|c| c.name().to_string()).collect(),
            #[cfg(feature = "ms_servo")]
            SubDevices::Servos(servos) => servos.iter().map(|s| s.name().to_string()).collect(),
        }
    }

    #[cfg(feature = "ht_smux")]
    pub async fn mux_channels(&self) -> Vec<String> {
        let state = self.state.lock().await;
        match &state.sub_devices {
            SubDevices::MuxChannels(channels) => channels.iter().map(|c| c.name().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Attaches `callback` to multiplexer channel `channel` (0-based).
    /// Fails when the channels do not exist.
    #[cfg(feature = "ht_smux")]
    pub async fn register_channel_poll_callback(
        &self,
        channel: usize,
        callback: ChannelPollCallback,
    ) -> SensorResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_present(state)?;
        if let SubDevices::MuxChannels(channels) = &mut state.sub_devices {
            if let Some(entry) = channels.get_mut(channel) {
                entry.set_callback(callback);
                debug!("[{}] poll callback attached to {}", self.id, entry.name());
                return Ok(());
            }
        }
        Err(SensorError::NoSubDevices {
            sensor: self.id.clone(),
            kind: "multiplexer channel",
            index: channel,
        })
    }

    async fn teardown(&self, state: &mut InstanceState) {
        // servo liveness is checked under the bus lock, so release under it too
        let mut bus = self.bus.lock().await;
        if let Some(hooks) = self.info.hooks {
            let mut ctx = self.hook_context(&mut *bus, &mut state.sub_devices, &mut state.poll_ms);
            hooks.on_remove(&mut ctx).await;
        }
        // whatever the hook left behind
        state.sub_devices.release(self.ports.as_ref());
        drop(bus);
        state.mode = ModeState::Idle;
        state.values = None;
        state.raw.clear();
    }

    /// Releases every sub-device and detaches from the device. Never fails.
    pub async fn remove(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.removed {
            return;
        }
        self.teardown(state).await;
        state.removed = true;
        state.poll_ms = 0;
        self.poll_tx.send_replace(0);
        info!("[{}] removed", self.id);
    }
}

impl std::fmt::Debug for SensorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorInstance")
            .field("id", &self.id)
            .field("port_name", &self.port_name)
            .field("address", &self.address)
            .field("driver", &self.info.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::ports::PortTable;
    use crate::sensors::{find_sensor_info, DataType};

    struct Fixture {
        mock: Arc<Mutex<MockBus>>,
        ports: Arc<PortTable>,
        sensor: SensorInstance,
    }

    fn fixture_for(info: &'static SensorInfo, address: u8) -> Fixture {
        let mock = Arc::new(Mutex::new(MockBus::new()));
        let ports = Arc::new(PortTable::new());
        let bus: SharedBus = mock.clone();
        let sensor = SensorInstance::new("test", "in1", address, info, bus, ports.clone());
        Fixture { mock, ports, sensor }
    }

    fn fixture(driver: &str, address: u8) -> Fixture {
        fixture_for(find_sensor_info(driver).unwrap(), address)
    }

    static BLOCK_SENSOR: SensorInfo = SensorInfo {
        name: "block-test",
        vendor_id: "TEST",
        product_id: "Block",
        modes: &[
            ModeInfo::new("BLOCK-96", 0x10).data(DataType::U16, 4).read_len(96),
            ModeInfo::new("BLOCK-1", 0x10),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    };

    #[tokio::test]
    async fn test_probe_enters_mode_zero() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.sensor.probe().await.unwrap();

        assert_eq!(f.sensor.current_mode().await, Some(0));
        assert_eq!(f.sensor.pin1_state().await, Some(PinState::High));
        assert_eq!(f.mock.lock().await.writes(), vec![(0x41, 0x02)]);
        assert_eq!(f.sensor.poll_interval(), 0);
    }

    #[tokio::test]
    async fn test_failed_register_write_keeps_previous_mode() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.sensor.probe().await.unwrap();
        f.mock.lock().await.fail_next_write();

        let err = f.sensor.request_mode(1).await.unwrap_err();
        assert!(matches!(err, SensorError::Transport(_)));
        assert_eq!(f.sensor.current_mode().await, Some(0));
        assert_eq!(f.sensor.mode_state().await, ModeState::Active(0));
    }

    #[tokio::test]
    async fn test_rerequesting_mode_writes_again() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.sensor.probe().await.unwrap();
        f.mock.lock().await.clear_operations();

        f.sensor.request_mode(2).await.unwrap();
        f.sensor.request_mode(2).await.unwrap();

        assert_eq!(f.mock.lock().await.writes(), vec![(0x41, 0x01), (0x41, 0x01)]);
        assert_eq!(f.sensor.current_mode().await, Some(2));
    }

    #[tokio::test]
    async fn test_select_mode_honours_read_only_count() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.sensor.probe().await.unwrap();

        assert_eq!(f.sensor.user_modes(), vec!["NXT-US-CM", "NXT-US-IN"]);
        assert_eq!(f.sensor.list_modes().len(), 5);

        f.sensor.select_mode("NXT-US-IN").await.unwrap();
        assert_eq!(f.sensor.current_mode().await, Some(1));

        let err = f.sensor.select_mode("NXT-US-SI-CM").await.unwrap_err();
        assert!(matches!(err, SensorError::NotSelectable { .. }));
        let err = f.sensor.select_mode("NXT-US-FT").await.unwrap_err();
        assert!(matches!(err, SensorError::UnknownMode { .. }));

        // index-based requests reach every mode
        f.sensor.request_mode(2).await.unwrap();
        assert_eq!(f.sensor.current_mode().await, Some(2));
    }

    #[tokio::test]
    async fn test_unknown_mode_index_is_rejected() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.sensor.probe().await.unwrap();

        let err = f.sensor.request_mode(5).await.unwrap_err();
        assert!(matches!(err, SensorError::UnknownMode { .. }));
        assert_eq!(f.sensor.current_mode().await, Some(0));
    }

    #[tokio::test]
    async fn test_probe_fails_when_initial_mode_fails() {
        let f = fixture("lego-nxt-ultrasonic", 0x01);
        f.mock.lock().await.fail_next_write();

        let err = f.sensor.probe().await.unwrap_err();
        assert!(matches!(err, SensorError::Probe { .. }));
        assert_eq!(f.sensor.current_mode().await, None);
        assert!(matches!(f.sensor.poll_once().await, Err(SensorError::NotActive { .. })));
    }

    #[tokio::test]
    async fn test_poll_tiles_large_payloads() {
        let f = fixture_for(&BLOCK_SENSOR, 0x02);
        let synthetic: Vec<u8> = (0..96u8).map(|i| i.wrapping_mul(7)).collect();
        f.mock.lock().await.set_registers(0x02, 0x10, &synthetic);
        f.sensor.probe().await.unwrap();
        f.mock.lock().await.clear_operations();

        let values = f.sensor.poll_once().await.unwrap();

        assert_eq!(f.mock.lock().await.block_reads(), vec![(0x10, 32), (0x30, 32), (0x50, 32)]);
        assert_eq!(f.sensor.raw_data().await, synthetic);
        assert_eq!(values.values.len(), 4);
        assert_eq!(values.values[0].raw, u16::from_le_bytes([synthetic[0], synthetic[1]]) as i64);
        assert_eq!(values.values[3].raw, u16::from_le_bytes([synthetic[6], synthetic[7]]) as i64);
    }

    static TAIL_SENSOR: SensorInfo = SensorInfo {
        name: "tail-test",
        vendor_id: "TEST",
        product_id: "Tail",
        modes: &[ModeInfo::new("TAIL-64", 0xE0).read_len(64)],
        read_only_count: None,
        slow: false,
        hooks: None,
    };

    #[tokio::test]
    async fn test_poll_never_wraps_to_register_zero() {
        let f = fixture_for(&TAIL_SENSOR, 0x02);
        assert!(TAIL_SENSOR.validate().is_err());
        f.sensor.probe().await.unwrap();
        f.mock.lock().await.clear_operations();

        let err = f.sensor.poll_once().await.unwrap_err();
        assert!(matches!(err, SensorError::Configuration { .. }));
        assert_eq!(f.mock.lock().await.block_reads(), vec![(0xE0, 32)]);
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_values() {
        let f = fixture_for(&BLOCK_SENSOR, 0x02);
        f.sensor.probe().await.unwrap();
        f.sensor.request_mode(1).await.unwrap();
        f.mock.lock().await.set_register(0x02, 0x10, 42);
        f.sensor.poll_once().await.unwrap();

        f.mock.lock().await.set_register(0x02, 0x10, 43);
        f.mock.lock().await.fail_next_read();
        assert!(f.sensor.poll_once().await.is_err());

        let values = f.sensor.read_values().await.unwrap();
        assert_eq!(values.values[0].raw, 42);
    }

    #[tokio::test]
    async fn test_mode_switch_clears_values() {
        let f = fixture_for(&BLOCK_SENSOR, 0x02);
        f.sensor.probe().await.unwrap();
        f.sensor.poll_once().await.unwrap();
        assert!(f.sensor.read_values().await.is_some());

        f.sensor.request_mode(1).await.unwrap();
        assert!(f.sensor.read_values().await.is_none());
    }

    #[cfg(feature = "ht_smux")]
    mod smux {
        use super::*;
        use crate::sensors::ht_smux::*;
        use std::sync::atomic::{AtomicU8, Ordering};

        const SMUX_ADDRESS: u8 = 0x08;

        #[tokio::test]
        async fn test_run_mode_registers_four_channels() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();

            assert_eq!(f.ports.names(), vec!["in1:mux1", "in1:mux2", "in1:mux3", "in1:mux4"]);
            assert_eq!(f.sensor.mux_channels().await.len(), NUM_CHANNELS);
            assert_eq!(f.mock.lock().await.register(SMUX_ADDRESS, COMMAND_REG), COMMAND_RUN);
        }

        #[tokio::test]
        async fn test_detect_requires_halt() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();
            f.mock.lock().await.clear_operations();

            let err = f.sensor.request_mode(MODE_DETECT).await.unwrap_err();
            assert!(matches!(err, SensorError::InvalidTransition { .. }));
            assert!(f.mock.lock().await.writes().is_empty());
            assert_eq!(f.sensor.current_mode().await, Some(MODE_RUN));
            assert_eq!(f.ports.len(), NUM_CHANNELS);
        }

        #[tokio::test]
        async fn test_halt_releases_channels_and_detect_blocks_switches() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();

            f.sensor.request_mode(MODE_HALT).await.unwrap();
            assert!(f.ports.is_empty());
            assert!(f.sensor.mux_channels().await.is_empty());

            f.mock.lock().await.set_register(SMUX_ADDRESS, STATUS_REG, STATUS_HALT);
            f.sensor.request_mode(MODE_DETECT).await.unwrap();

            // the command register now reads back DETECT
            let err = f.sensor.request_mode(MODE_RUN).await.unwrap_err();
            assert!(matches!(err, SensorError::InvalidTransition { .. }));
            assert_eq!(f.sensor.current_mode().await, Some(MODE_DETECT));
        }

        #[tokio::test]
        async fn test_channel_registration_is_all_or_nothing() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.ports.fail_registration_at(3);

            // post-switch failures do not undo the mode change
            f.sensor.probe().await.unwrap();
            assert_eq!(f.sensor.current_mode().await, Some(MODE_RUN));
            assert!(f.ports.is_empty());
            assert!(f.sensor.mux_channels().await.is_empty());

            // re-requesting run mode recreates them
            f.sensor.request_mode(MODE_RUN).await.unwrap();
            assert_eq!(f.ports.len(), NUM_CHANNELS);
        }

        #[tokio::test]
        async fn test_i2c_data_is_read_only_for_configured_pairs() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();
            {
                let mut mock = f.mock.lock().await;
                mock.set_register(SMUX_ADDRESS, CH2_CONFIG_REG, CONFIG_I2C);
                mock.set_register(SMUX_ADDRESS, CH2_I2C_DATA_REG, 0x5A);
                mock.clear_operations();
            }

            let seen = Arc::new(AtomicU8::new(0));
            let sink = seen.clone();
            f.sensor
                .register_channel_poll_callback(
                    1,
                    Arc::new(move |frame: &ChannelFrame<'_>| {
                        if frame.has_i2c_sensor() {
                            sink.store(frame.i2c_data()[0], Ordering::SeqCst);
                        }
                    }),
                )
                .await
                .unwrap();

            let values = f.sensor.poll_once().await.unwrap();

            assert_eq!(f.mock.lock().await.block_reads(), vec![(COMMAND_REG, 32), (CH1_I2C_DATA_REG, 32)]);
            assert_eq!(f.sensor.raw_data().await.len(), RAW_LEN);
            assert_eq!(values.values[0].raw, COMMAND_RUN as i64);
            assert_eq!(seen.load(Ordering::SeqCst), 0x5A);
        }

        #[tokio::test]
        async fn test_callback_requires_channels() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            let err = f
                .sensor
                .register_channel_poll_callback(0, Arc::new(|_: &ChannelFrame<'_>| {}))
                .await
                .unwrap_err();

            assert!(matches!(err, SensorError::NoSubDevices { index: 0, .. }));
            assert!(f.ports.is_empty());
        }

        #[tokio::test]
        async fn test_remove_continues_past_unregister_failure() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();
            let stuck = f.ports.handle_of("in1:mux2").unwrap();
            f.ports.fail_unregister_of(stuck);

            f.sensor.remove().await;

            assert_eq!(f.ports.names(), vec!["in1:mux2"]);
            assert!(f.sensor.is_removed().await);
            assert!(f.sensor.mux_channels().await.is_empty());
            assert_eq!(f.sensor.current_mode().await, None);
        }

        #[tokio::test]
        async fn test_remove_releases_channels() {
            let f = fixture("ht-nxt-smux", SMUX_ADDRESS);
            f.sensor.probe().await.unwrap();
            f.sensor.remove().await;

            assert!(f.ports.is_empty());
            assert!(f.sensor.is_removed().await);
            assert!(matches!(f.sensor.request_mode(MODE_RUN).await, Err(SensorError::Removed { .. })));
        }
    }

    #[cfg(feature = "ms_servo")]
    mod servo {
        use super::*;
        use crate::sensors::ms_servo::*;

        const SERVO_ADDRESS: u8 = 0x58;

        #[tokio::test]
        async fn test_probe_registers_eight_servos() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.sensor.probe().await.unwrap();

            assert_eq!(f.ports.len(), NUM_SERVOS);
            assert_eq!(f.sensor.sub_device_names().await[7], "in1:sv8");
            assert_eq!(f.sensor.poll_interval(), DEFAULT_POLL_MS);
        }

        #[tokio::test]
        async fn test_servo_registers() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.sensor.probe().await.unwrap();
            f.mock.lock().await.clear_operations();

            let servo = f.sensor.servo(2).await.unwrap();
            servo.set_position(1500).await.unwrap();
            servo.set_rate(12000).await.unwrap();

            assert_eq!(f.mock.lock().await.writes(), vec![(0x46, 1500), (0x54, 2)]);
            assert_eq!(servo.get_position().await.unwrap(), 1500);
            assert_eq!(servo.get_rate().await.unwrap(), 12000);
            assert!(matches!(
                f.sensor.servo(8).await,
                Err(SensorError::NoSubDevices { index: 8, .. })
            ));
        }

        #[tokio::test]
        async fn test_failed_registration_leaves_controller_usable() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.ports.fail_registration_at(5);

            f.sensor.probe().await.unwrap();
            assert!(f.ports.is_empty());
            assert!(f.sensor.sub_device_names().await.is_empty());
            assert_eq!(f.sensor.current_mode().await, Some(0));
            assert_eq!(f.sensor.poll_interval(), 0);
            assert!(matches!(
                f.sensor.servo(0).await,
                Err(SensorError::NoSubDevices { index: 0, .. })
            ));

            f.mock.lock().await.set_register(SERVO_ADDRESS, 0x62, 150);
            let values = f.sensor.poll_once().await.unwrap();
            assert_eq!(values.values[0].raw, 150);
        }

        #[tokio::test]
        async fn test_servo_access_queued_behind_removal_is_refused() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.sensor.probe().await.unwrap();
            let servo = f.sensor.servo(0).await.unwrap();
            let sensor = Arc::new(f.sensor);
            f.mock.lock().await.clear_operations();

            let bus = f.mock.lock().await;
            let removal = tokio::spawn({
                let sensor = sensor.clone();
                async move { sensor.remove().await }
            });
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let write = tokio::spawn({
                let servo = servo.clone();
                async move { servo.set_position(1234).await }
            });
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            drop(bus);

            removal.await.unwrap();
            let result = write.await.unwrap();
            assert!(matches!(result, Err(SensorError::SubDeviceReleased { .. })));
            assert!(f.mock.lock().await.writes().is_empty());
            assert!(f.ports.is_empty());
            assert!(sensor.is_removed().await);
        }

        #[tokio::test]
        async fn test_remove_releases_remaining_servos_past_failure() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.sensor.probe().await.unwrap();
            let first = f.sensor.servo(0).await.unwrap();
            f.ports.fail_unregister_of(f.ports.handle_of("in1:sv4").unwrap());

            f.sensor.remove().await;

            assert_eq!(f.ports.names(), vec!["in1:sv4"]);
            assert!(first.is_released());
            assert!(f.sensor.is_removed().await);
            assert!(f.sensor.sub_device_names().await.is_empty());
        }

        #[tokio::test]
        async fn test_removed_servos_refuse_access() {
            let f = fixture("ms-8ch-servo", SERVO_ADDRESS);
            f.sensor.probe().await.unwrap();
            let servo = f.sensor.servo(0).await.unwrap();

            f.sensor.remove().await;

            assert!(f.ports.is_empty());
            assert!(servo.is_released());
            assert!(matches!(
                servo.get_position().await,
                Err(SensorError::SubDeviceReleased { .. })
            ));
            assert_eq!(f.sensor.poll_interval(), 0);
        }
    }
}
