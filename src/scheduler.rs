use crate::errors::SensorError;
use crate::instance::SensorInstance;
use crate::messages::{Header, ValueMessage};
use crate::publisher::ValuePublisher;
use crate::registry::SensorRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Device id stamped into every published header
pub const HUB_ID: &str = "nxt_sensorhub";

/// Spawns the poll loop of one sensor.
///
/// The loop follows the instance's poll interval: 0 parks it until the
/// interval changes. It ends once the sensor is removed.
pub fn spawn_sensor_task(sensor: Arc<SensorInstance>, publisher: ValuePublisher) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sensor_id = sensor.id().to_string();
        let mut poll_rx = sensor.poll_interval_watch();
        let mut sequence_counter = 0u64;
        let mut last_interval = None;

        info!("[{}] sensor task started", sensor_id);
        loop {
            let interval = *poll_rx.borrow_and_update();
            if sensor.is_removed().await {
                break;
            }
            if last_interval != Some(interval) {
                debug!("[{}] polling every {} ms", sensor_id, interval);
                publisher.set_active(&sensor_id, interval > 0, interval).await;
                last_interval = Some(interval);
            }

            if interval == 0 {
                if poll_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }

            match sensor.poll_once().await {
                Ok(reading) => {
                    sequence_counter += 1;
                    let header = Header::new(HUB_ID.to_string(), sensor_id.clone(), sequence_counter);
                    publisher
                        .publish(ValueMessage::new(header, sensor.info().name, reading))
                        .await;
                }
                Err(SensorError::Removed { .. }) => break,
                Err(e) => {
                    warn!("[{}] poll failed: {}", sensor_id, e);
                    publisher.record_error(&sensor_id, e.to_string()).await;
                }
            }

            tokio::select! {
                _ = sleep(Duration::from_millis(interval)) => {}
                changed = poll_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        publisher.set_active(&sensor_id, false, 0).await;
        info!("[{}] sensor task stopped", sensor_id);
    })
}

pub async fn spawn_sensor_tasks(registry: &SensorRegistry, publisher: &ValuePublisher) -> Vec<JoinHandle<()>> {
    registry
        .all()
        .await
        .into_iter()
        .map(|sensor| spawn_sensor_task(sensor, publisher.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::bus::SharedBus;
    use crate::ports::PortTable;
    use crate::sensors::find_sensor_info;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    async fn probed_sonar() -> (Arc<Mutex<MockBus>>, Arc<SensorInstance>) {
        let mock = Arc::new(Mutex::new(MockBus::new()));
        mock.lock().await.set_register(0x01, 0x42, 51);
        let bus: SharedBus = mock.clone();
        let sensor = Arc::new(SensorInstance::new(
            "sonar",
            "in1",
            0x01,
            find_sensor_info("lego-nxt-ultrasonic").unwrap(),
            bus,
            Arc::new(PortTable::new()),
        ));
        sensor.probe().await.unwrap();
        (mock, sensor)
    }

    #[tokio::test]
    async fn test_task_publishes_readings() {
        let (_, sensor) = probed_sonar().await;
        let publisher = ValuePublisher::new();
        let mut stream = publisher.subscribe_sensor("sonar");

        sensor.set_poll_interval(5).await.unwrap();
        let handle = spawn_sensor_task(sensor.clone(), publisher.clone());

        let msg = timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(msg.h.device_id, HUB_ID);
        assert_eq!(msg.mode, "NXT-US-CM");
        assert_eq!(msg.values[0].raw, 51);

        sensor.remove().await;
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_parks_task() {
        let (mock, sensor) = probed_sonar().await;
        let publisher = ValuePublisher::new();
        mock.lock().await.clear_operations();

        let handle = spawn_sensor_task(sensor.clone(), publisher.clone());
        sleep(Duration::from_millis(20)).await;
        assert!(mock.lock().await.block_reads().is_empty());

        sensor.remove().await;
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(!publisher.stats("sonar").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_failed_ticks_are_recorded() {
        let (mock, sensor) = probed_sonar().await;
        let publisher = ValuePublisher::new();
        mock.lock().await.fail_register(0x42);

        sensor.set_poll_interval(5).await.unwrap();
        let handle = spawn_sensor_task(sensor.clone(), publisher.clone());
        sleep(Duration::from_millis(30)).await;

        let stats = publisher.stats("sonar").await.unwrap();
        assert!(stats.errors > 0);
        assert!(!stats.is_healthy);

        sensor.remove().await;
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
