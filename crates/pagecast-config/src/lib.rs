//! Configuration for pagecast services.
//!
//! Settings come from built-in defaults, an optional KDL file and the process
//! environment, in increasing order of precedence. Everything required is
//! validated up front so a misconfigured process never starts.

pub mod error;
pub mod file;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use file::{FileConfig, parse_config_file};
pub use system::{
    HttpConfig, QueueConfig, S3Config, StorageConfig, SystemConfig, WorkerConfig,
};
