use nxt_sensorhub::config::config_dir;
use nxt_sensorhub::{init_tracing, run_sensor_hub};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug for verbose, RUST_LOG=info for normal, RUST_LOG=warn for production
    init_tracing();

    let config_path = config_dir();
    tracing::info!("[main] configuration path: {}", config_path);

    run_sensor_hub(&config_path).await
}
