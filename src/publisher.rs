use crate::messages::ValueMessage;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Readings buffered per subscriber before the slowest one starts lagging
const CHANNEL_CAPACITY: usize = 1024;

pub type ValueStream = Pin<Box<dyn Stream<Item = Result<ValueMessage, BroadcastStreamRecvError>> + Send>>;

/// Fans readings out to any number of subscribers
#[derive(Clone)]
pub struct ValuePublisher {
    all_tx: broadcast::Sender<ValueMessage>,

    // Sensor status tracking
    sensor_stats: Arc<RwLock<HashMap<String, SensorStats>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SensorStats {
    pub is_active: bool,
    pub is_healthy: bool,
    pub poll_ms: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub last_message_time_ns: u64,
    pub error_message: Option<String>,
}

impl Default for SensorStats {
    fn default() -> Self {
        Self {
            is_active: false,
            is_healthy: true,
            poll_ms: 0,
            messages_sent: 0,
            errors: 0,
            last_message_time_ns: 0,
            error_message: None,
        }
    }
}

impl Default for ValuePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuePublisher {
    pub fn new() -> Self {
        let (all_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            all_tx,
            sensor_stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publishes one reading; returns the number of subscribers that got it
    pub async fn publish(&self, message: ValueMessage) -> usize {
        let sensor_id = message.sensor_id().to_string();
        // No active subscribers is fine
        let receivers = self.all_tx.send(message).unwrap_or(0);

        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id).or_default();
        entry.is_active = true;
        entry.is_healthy = true;
        entry.error_message = None;
        entry.messages_sent += 1;
        entry.last_message_time_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        receivers
    }

    pub async fn record_error(&self, sensor_id: &str, error: String) {
        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id.to_string()).or_default();
        entry.is_healthy = false;
        entry.errors += 1;
        entry.error_message = Some(error);
    }

    pub async fn set_active(&self, sensor_id: &str, active: bool, poll_ms: u64) {
        let mut stats = self.sensor_stats.write().await;
        let entry = stats.entry(sensor_id.to_string()).or_default();
        entry.is_active = active;
        entry.poll_ms = poll_ms;
    }

    pub async fn stats(&self, sensor_id: &str) -> Option<SensorStats> {
        self.sensor_stats.read().await.get(sensor_id).cloned()
    }

    pub async fn all_stats(&self) -> HashMap<String, SensorStats> {
        self.sensor_stats.read().await.clone()
    }

    /// Stream of every reading published from now on
    pub fn subscribe(&self) -> ValueStream {
        info!("[publisher] new subscriber for all sensors");
        Box::pin(BroadcastStream::new(self.all_tx.subscribe()))
    }

    /// Stream of the readings of one sensor
    pub fn subscribe_sensor(&self, sensor_id: &str) -> ValueStream {
        debug!("[publisher] new subscriber for {}", sensor_id);
        let sensor_id = sensor_id.to_string();
        let stream = BroadcastStream::new(self.all_tx.subscribe()).filter(move |item| match item {
            Ok(msg) => msg.sensor_id() == sensor_id,
            // lag notifications go to everyone
            Err(_) => true,
        });
        Box::pin(stream)
    }
}
