//! CLI command implementations.

pub mod jobs;
pub mod worker;

use anyhow::Result;
use pagecast_config::{StorageConfig, SystemConfig};
use std::path::Path;

pub fn validate_config(path: Option<&Path>) -> Result<()> {
    match SystemConfig::load(path) {
        Ok(config) => {
            match &config.storage {
                StorageConfig::S3(s3) => println!("Storage: s3 ({:?})", s3),
                StorageConfig::Local { root } => println!("Storage: local ({})", root.display()),
            }
            println!("Workspace: {}", config.worker.workspace.display());
            println!("API: {}  Edge: {}", config.http.api_addr, config.http.edge_addr);
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
