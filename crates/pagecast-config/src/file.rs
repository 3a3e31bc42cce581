//! KDL configuration file parsing.
//!
//! ```kdl
//! storage "s3" {
//!     bucket "sites"
//!     region "eu-west-1"
//! }
//! queue {
//!     database-url "postgres://pagecast@localhost/pagecast"
//!     poll-interval-ms 500
//! }
//! worker {
//!     workspace "/var/lib/pagecast"
//!     build-timeout-secs 900
//! }
//! ```
//!
//! Credentials are never read from the file; they only come from the
//! environment.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::HashMap;
use std::path::Path;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pagecast.kdl";

const SECTIONS: &[(&str, &[&str])] = &[
    ("storage", &["bucket", "region", "endpoint", "root"]),
    (
        "queue",
        &["database-url", "poll-interval-ms", "visibility-timeout-secs"],
    ),
    (
        "worker",
        &[
            "workspace",
            "retry-delay-secs",
            "npm",
            "build-timeout-secs",
            "transfer-concurrency",
        ],
    ),
    ("http", &["api-addr", "edge-addr"]),
];

/// Raw values read from a configuration file, keyed `section.key`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    values: HashMap<String, String>,
}

impl FileConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// Read `path` if given, otherwise `pagecast.kdl` when it exists.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => parse_config_file(&std::fs::read_to_string(path)?),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    parse_config_file(&std::fs::read_to_string(default)?)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Parse configuration from KDL text.
pub fn parse_config_file(kdl: &str) -> ConfigResult<FileConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut values = HashMap::new();

    for node in doc.nodes() {
        let section = node.name().value();
        let Some((_, keys)) = SECTIONS.iter().find(|(name, _)| *name == section) else {
            return Err(ConfigError::InvalidValue {
                field: section.to_string(),
                message: "unknown configuration section".to_string(),
            });
        };

        if section == "storage" {
            if let Some(backend) = get_first_arg(node) {
                values.insert("storage.backend".to_string(), backend);
            }
        }

        let Some(children) = node.children() else {
            continue;
        };
        for child in children.nodes() {
            let name = child.name().value();
            let key = format!("{}.{}", section, name);
            if !keys.contains(&name) {
                return Err(ConfigError::InvalidValue {
                    field: key,
                    message: "unknown configuration key".to_string(),
                });
            }
            let value = get_first_arg(child)
                .ok_or_else(|| ConfigError::MissingField(format!("value for {}", key)))?;
            values.insert(key, value);
        }
    }

    Ok(FileConfig { values })
}

fn get_first_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| value_to_string(e.value()))
}

fn value_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}
