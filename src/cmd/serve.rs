//! Server command: `garage serve`.

use anyhow::Result;

use garage::garage_config::GarageConfig;
use garage::workshop::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: GarageConfig) -> Result<()> {
    let server = ServerConfig::from_config(&config);
    println!("Garage server starting on http://{}:{}", server.host, server.port);
    start_server(server).await
}
