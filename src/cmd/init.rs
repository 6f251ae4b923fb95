//! Data directory setup: `garage init`.

use std::path::Path;

use anyhow::{Context, Result};

use garage::garage_config::{GarageConfig, GarageToml};
use garage::workshop::db::GarageDb;

pub fn cmd_init(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let config = GarageConfig::new(data_dir.to_path_buf())?;
    let config_path = config.config_file();
    let created_config = !config_path.exists();
    if created_config {
        GarageToml::default().save(&config_path)?;
    }

    let db_path = config.db_path();
    let created_db = !db_path.exists();
    GarageDb::new(&db_path)?;
    tracing::debug!(db = %db_path.display(), "database schema ready");

    if created_config || created_db {
        println!("Initialized garage data directory at {}", data_dir.display());
    } else {
        println!("Garage data directory already initialized at {}", data_dir.display());
    }
    println!("  config:   {}", config_path.display());
    println!("  database: {}", db_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit garage.toml ([push] backend and credentials, [[catalog]])");
    println!("  2. Run `garage serve` to start the server");

    Ok(())
}
