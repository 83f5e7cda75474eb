use crate::bus::i2c::I2CBus;
use crate::bus::mock::MockBus;
use crate::bus::{BusType, SharedBus};
use crate::config::{BusConfig, SensorConfig, SensorEntry};
use crate::errors::{RegistryError, RegistryResult, SensorError};
use crate::instance::SensorInstance;
use crate::ports::PortRegistrar;
use crate::sensors::catalog::GENERIC_SENSOR;
use crate::sensors::{find_sensor_info, identify, read_identity, SensorInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Registry key: bus id and device address
pub type SensorKey = (String, u8);

/// Live sensor instances, keyed by where they sit on the buses
#[derive(Default)]
pub struct SensorRegistry {
    sensors: RwLock<HashMap<SensorKey, Arc<SensorInstance>>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bus: &str, sensor: Arc<SensorInstance>) -> RegistryResult<()> {
        let mut sensors = self.sensors.write().await;
        let key = (bus.to_string(), sensor.address());
        if sensors.contains_key(&key) {
            return Err(RegistryError::DuplicateAddress {
                bus: bus.to_string(),
                address: sensor.address(),
            });
        }
        sensors.insert(key, sensor);
        Ok(())
    }

    pub async fn get(&self, bus: &str, address: u8) -> Option<Arc<SensorInstance>> {
        self.sensors.read().await.get(&(bus.to_string(), address)).cloned()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Arc<SensorInstance>> {
        self.sensors.read().await.values().find(|s| s.id() == id).cloned()
    }

    /// Every instance, sorted by sensor id
    pub async fn all(&self) -> Vec<Arc<SensorInstance>> {
        let mut sensors: Vec<_> = self.sensors.read().await.values().cloned().collect();
        sensors.sort_by(|a, b| a.id().cmp(b.id()));
        sensors
    }

    pub async fn len(&self) -> usize {
        self.sensors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sensors.read().await.is_empty()
    }

    /// Unregisters the sensor and tears it down
    pub async fn remove(&self, bus: &str, address: u8) -> Option<Arc<SensorInstance>> {
        let sensor = self.sensors.write().await.remove(&(bus.to_string(), address))?;
        sensor.remove().await;
        info!("[registry] removed sensor {} from {}", sensor.id(), bus);
        Some(sensor)
    }

    pub async fn remove_all(&self) {
        let drained: Vec<_> = self.sensors.write().await.drain().collect();
        for ((bus, _), sensor) in drained {
            sensor.remove().await;
            info!("[registry] removed sensor {} from {}", sensor.id(), bus);
        }
    }
}

/// Opens every configured bus
pub fn init_buses(bus_config: &BusConfig) -> RegistryResult<HashMap<String, SharedBus>> {
    let mut bus_map: HashMap<String, SharedBus> = HashMap::new();
    for b in bus_config.buses.iter() {
        let bus: SharedBus = match b.bus_type()? {
            BusType::I2C => {
                let bus = I2CBus::new(&b.path).map_err(|e| {
                    warn!("[registry] failed to open {}: {}", b.path, e);
                    RegistryError::DriverCreationError(SensorError::BusNotFound { bus: b.id.clone() })
                })?;
                Arc::new(Mutex::new(bus))
            }
            BusType::Mock => Arc::new(Mutex::new(MockBus::new())),
        };
        info!("[registry] bus {} ready ({})", b.id, b.r#type);
        bus_map.insert(b.id.clone(), bus);
    }
    Ok(bus_map)
}

/// Picks the mode table for a configured sensor, reading the device's
/// identification strings when the driver is `auto`
async fn resolve_driver(entry: &SensorEntry, bus: &SharedBus) -> RegistryResult<&'static SensorInfo> {
    if !entry.is_auto() {
        return find_sensor_info(&entry.driver).ok_or_else(|| {
            RegistryError::DriverCreationError(SensorError::UnsupportedDriver {
                driver: entry.driver.clone(),
            })
        });
    }

    let identity = {
        let mut bus = bus.lock().await;
        read_identity(&mut *bus, entry.address).await
    };
    let info = match identity {
        Ok(identity) => identify(&identity).or_else(|| {
            warn!(
                "[registry] {}: unknown device '{}' '{}', using {}",
                entry.id, identity.vendor_id, identity.product_id, GENERIC_SENSOR
            );
            find_sensor_info(GENERIC_SENSOR)
        }),
        Err(e) => {
            warn!("[registry] {}: identification failed ({}), using {}", entry.id, e, GENERIC_SENSOR);
            find_sensor_info(GENERIC_SENSOR)
        }
    };
    info.ok_or_else(|| {
        RegistryError::DriverCreationError(SensorError::UnsupportedDriver {
            driver: GENERIC_SENSOR.to_string(),
        })
    })
}

async fn init_sensor(
    entry: &SensorEntry,
    bus: &SharedBus,
    ports: &Arc<dyn PortRegistrar>,
) -> RegistryResult<Arc<SensorInstance>> {
    let info = resolve_driver(entry, bus).await?;
    info!(
        "[registry] registering sensor: id={} driver={} bus={} address={:#04x}",
        entry.id, info.name, entry.bus, entry.address
    );

    let sensor = Arc::new(SensorInstance::new(
        entry.id.clone(),
        entry.port_name(),
        entry.address,
        info,
        bus.clone(),
        ports.clone(),
    ));
    sensor.probe().await.map_err(RegistryError::RegistrationError)?;

    let configured = async {
        if let Some(mode) = &entry.mode {
            let index = sensor.mode_by_name(mode)?;
            sensor.request_mode(index).await?;
        }
        if let Some(poll_ms) = entry.poll_ms {
            sensor.set_poll_interval(poll_ms).await?;
        }
        Ok::<_, SensorError>(())
    };
    if let Err(e) = configured.await {
        sensor.remove().await;
        return Err(RegistryError::RegistrationError(e));
    }
    Ok(sensor)
}

/// Opens the buses, then probes and registers every configured sensor.
/// Any failure removes the sensors registered so far.
pub async fn init_all(
    sensor_config: &SensorConfig,
    bus_config: &BusConfig,
    ports: Arc<dyn PortRegistrar>,
) -> RegistryResult<(SensorRegistry, HashMap<String, SharedBus>)> {
    let bus_map = init_buses(bus_config)?;
    let registry = SensorRegistry::new();

    info!("[registry] initializing {} sensors...", sensor_config.sensors.len());
    for entry in sensor_config.sensors.iter() {
        let result = match bus_map.get(&entry.bus) {
            Some(bus) => match init_sensor(entry, bus, &ports).await {
                Ok(sensor) => registry.insert(&entry.bus, sensor.clone()).await.map_err(|e| (e, Some(sensor))),
                Err(e) => Err((e, None)),
            },
            None => Err((
                RegistryError::DriverCreationError(SensorError::BusNotFound {
                    bus: entry.bus.clone(),
                }),
                None,
            )),
        };

        if let Err((e, orphan)) = result {
            warn!("[registry] sensor {} failed: {}", entry.id, e);
            if let Some(sensor) = orphan {
                sensor.remove().await;
            }
            registry.remove_all().await;
            return Err(e);
        }
    }

    Ok((registry, bus_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortTable;
    use crate::sensors::catalog::{PRODUCT_ID_REG, VENDOR_ID_REG};

    fn mock_buses() -> BusConfig {
        BusConfig::parse("[[bus]]\nid = \"sim\"\ntype = \"mock\"\n").unwrap()
    }

    fn entry(id: &str, driver: &str, address: u8) -> SensorEntry {
        SensorEntry {
            id: id.to_string(),
            driver: driver.to_string(),
            bus: "sim".to_string(),
            address,
            port: None,
            mode: None,
            poll_ms: None,
        }
    }

    fn shared_mock() -> (Arc<Mutex<MockBus>>, SharedBus) {
        let mock = Arc::new(Mutex::new(MockBus::new()));
        let bus: SharedBus = mock.clone();
        (mock, bus)
    }

    #[tokio::test]
    async fn test_registry_lookup_and_removal() {
        let ports: Arc<dyn PortRegistrar> = Arc::new(PortTable::new());
        let (_, bus) = shared_mock();
        let registry = SensorRegistry::new();

        let sensor = init_sensor(&entry("sonar", "lego-nxt-ultrasonic", 0x01), &bus, &ports)
            .await
            .unwrap();
        registry.insert("sim", sensor.clone()).await.unwrap();

        assert!(registry.get("sim", 0x01).await.is_some());
        assert_eq!(registry.get_by_id("sonar").await.unwrap().address(), 0x01);
        assert!(matches!(
            registry.insert("sim", sensor).await,
            Err(RegistryError::DuplicateAddress { address: 0x01, .. })
        ));

        let removed = registry.remove("sim", 0x01).await.unwrap();
        assert!(removed.is_removed().await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_auto_driver_identifies_device() {
        let ports: Arc<dyn PortRegistrar> = Arc::new(PortTable::new());
        let (mock, bus) = shared_mock();
        {
            let mut mock = mock.lock().await;
            mock.set_string(0x01, VENDOR_ID_REG, "HiTechnc", 8);
            mock.set_string(0x01, PRODUCT_ID_REG, "Compass", 8);
        }

        let sensor = init_sensor(&entry("heading", "auto", 0x01), &bus, &ports).await.unwrap();
        assert_eq!(sensor.info().name, "ht-nxt-compass");
    }

    #[tokio::test]
    async fn test_auto_driver_falls_back_to_generic() {
        let ports: Arc<dyn PortRegistrar> = Arc::new(PortTable::new());
        let (_, bus) = shared_mock();

        let sensor = init_sensor(&entry("thing", "auto", 0x02), &bus, &ports).await.unwrap();
        assert_eq!(sensor.info().name, GENERIC_SENSOR);
    }

    #[tokio::test]
    async fn test_configured_mode_and_interval_are_applied() {
        let ports: Arc<dyn PortRegistrar> = Arc::new(PortTable::new());
        let (_, bus) = shared_mock();
        let mut sonar = entry("sonar", "lego-nxt-ultrasonic", 0x01);
        sonar.mode = Some("NXT-US-SI-CM".to_string());
        sonar.poll_ms = Some(250);

        let sensor = init_sensor(&sonar, &bus, &ports).await.unwrap();
        assert_eq!(sensor.current_mode().await, Some(2));
        assert_eq!(sensor.poll_interval(), 250);
    }

    #[tokio::test]
    async fn test_init_all_rolls_back_on_failure() {
        let ports = Arc::new(PortTable::new());
        let sensors = SensorConfig {
            sensors: vec![
                entry("servos", "ms-8ch-servo", 0x58),
                entry("bogus", "no-such-driver", 0x01),
            ],
        };

        let result = init_all(&sensors, &mock_buses(), ports.clone()).await;
        assert!(matches!(
            result,
            Err(RegistryError::DriverCreationError(SensorError::UnsupportedDriver { .. }))
        ));
        assert!(ports.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_bus_is_reported() {
        let mut orphan = entry("orphan", "nxt-i2c", 0x01);
        orphan.bus = "missing".to_string();
        let sensors = SensorConfig { sensors: vec![orphan] };

        let result = init_all(&sensors, &mock_buses(), Arc::new(PortTable::new())).await;
        assert!(matches!(
            result,
            Err(RegistryError::DriverCreationError(SensorError::BusNotFound { .. }))
        ));
    }
}
