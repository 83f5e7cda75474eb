// Public modules
pub mod bus;
pub mod config;
pub mod errors;
pub mod instance;
pub mod messages;
pub mod ports;
pub mod publisher;
pub mod registry;
pub mod scheduler;
pub mod sensors;

// Re-export commonly used types
pub use config::{load_bus_config, load_sensor_config, BusConfig, SensorConfig};
pub use errors::{SensorError, SensorResult};
pub use instance::{ModeState, SensorInstance};
pub use ports::{PortRegistrar, PortTable};
pub use publisher::ValuePublisher;
pub use registry::{init_all, SensorRegistry};
pub use scheduler::spawn_sensor_tasks;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with default configuration
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Run the sensor hub with the given configuration directory until Ctrl-C
pub async fn run_sensor_hub(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("[NxtSensorHub] starting up...");

    // Load configuration
    let bus_config = load_bus_config(&format!("{}/buses.toml", config_path))?;
    let sensor_config = load_sensor_config(&format!("{}/sensors.toml", config_path))?;
    info!(
        "[config] loaded {} bus(es), {} sensor(s)",
        bus_config.buses.len(),
        sensor_config.sensors.len()
    );

    let ports = Arc::new(PortTable::new());
    let publisher = ValuePublisher::new();

    // Initialize buses and sensors
    let (registry, _buses) = init_all(&sensor_config, &bus_config, ports.clone()).await?;
    info!("[registry] {} sensor(s) registered", registry.len().await);

    let tasks = spawn_sensor_tasks(&registry, &publisher).await;
    info!("[main] {} sensor task(s) launched", tasks.len());

    tokio::signal::ctrl_c().await?;
    info!("[main] shutting down");

    // removal stops the tasks
    registry.remove_all().await;
    for task in tasks {
        task.await?;
    }
    let mut stats: Vec<_> = publisher.all_stats().await.into_iter().collect();
    stats.sort_by(|a, b| a.0.cmp(&b.0));
    for (sensor_id, s) in stats {
        info!("[{}] {} reading(s), {} error(s)", sensor_id, s.messages_sent, s.errors);
    }
    info!("[main] {} child port(s) left registered", ports.len());
    Ok(())
}
