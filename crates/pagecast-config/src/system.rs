//! Resolved, validated service configuration.

use crate::{ConfigError, ConfigResult, FileConfig};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Everything a pagecast process needs before it touches the network.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub http: HttpConfig,
}

/// Object store backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    S3(S3Config),
    Local { root: PathBuf },
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// Custom endpoint (MinIO, localstack). Requests use path-style URLs.
    pub endpoint: Option<String>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub database_url: String,
    /// How long an idle dequeue waits between polls.
    pub poll_interval: Duration,
    /// Claims older than this are returned to the queue at worker startup.
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Root directory holding one workspace per job.
    pub workspace: PathBuf,
    /// Delay before retrying the queue after a transport error.
    pub retry_delay: Duration,
    /// Package manager binary used for install and build.
    pub npm: String,
    /// Upper bound on each build subprocess; unbounded when `None`.
    pub build_timeout: Option<Duration>,
    /// Concurrent object-store transfers per job.
    pub transfer_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub api_addr: SocketAddr,
    pub edge_addr: SocketAddr,
}

impl SystemConfig {
    /// Load the optional config file and overlay the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = FileConfig::load(path)?;
        Self::resolve(&file, &|key| std::env::var(key).ok())
    }

    /// Resolve against an explicit environment lookup.
    pub fn resolve(file: &FileConfig, env: &dyn Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut resolver = Resolver::new(file, env);
        let storage = StorageConfig::resolve_with(&mut resolver)?;
        let queue = QueueConfig::resolve_with(&mut resolver)?;
        let worker = WorkerConfig::resolve_with(&mut resolver)?;
        let http = HttpConfig::resolve_with(&mut resolver)?;
        resolver.finish()?;

        Ok(Self {
            storage,
            queue,
            worker,
            http,
        })
    }
}

impl StorageConfig {
    fn resolve_with(r: &mut Resolver<'_>) -> ConfigResult<Self> {
        let backend = r
            .optional("PAGECAST_STORAGE", "storage.backend")
            .unwrap_or_else(|| "s3".to_string());

        match backend.as_str() {
            "s3" => Ok(StorageConfig::S3(S3Config {
                access_key_id: r.required_env("AWS_ACCESS_KEY_ID"),
                secret_access_key: r.required_env("AWS_SECRET_ACCESS_KEY"),
                region: r.required("AWS_REGION", "storage.region"),
                bucket: r.required("AWS_BUCKET_NAME", "storage.bucket"),
                session_token: r.optional_env("AWS_SESSION_TOKEN"),
                endpoint: r.optional("AWS_ENDPOINT_URL", "storage.endpoint"),
            })),
            "local" => Ok(StorageConfig::Local {
                root: PathBuf::from(r.required("PAGECAST_STORAGE_ROOT", "storage.root")),
            }),
            other => Err(ConfigError::InvalidValue {
                field: "storage backend".to_string(),
                message: format!("expected \"s3\" or \"local\", got {:?}", other),
            }),
        }
    }
}

impl QueueConfig {
    /// Resolve only the queue settings, for commands that never touch storage.
    pub fn resolve(file: &FileConfig, env: &dyn Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut resolver = Resolver::new(file, env);
        let queue = Self::resolve_with(&mut resolver)?;
        resolver.finish()?;
        Ok(queue)
    }

    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let file = FileConfig::load(path)?;
        Self::resolve(&file, &|key| std::env::var(key).ok())
    }

    fn resolve_with(r: &mut Resolver<'_>) -> ConfigResult<Self> {
        Ok(Self {
            database_url: r.required("DATABASE_URL", "queue.database-url"),
            poll_interval: Duration::from_millis(r.parse_or(
                "PAGECAST_POLL_INTERVAL_MS",
                "queue.poll-interval-ms",
                1000,
            )?),
            visibility_timeout: Duration::from_secs(r.parse_or(
                "PAGECAST_VISIBILITY_TIMEOUT_SECS",
                "queue.visibility-timeout-secs",
                3600,
            )?),
        })
    }
}

impl WorkerConfig {
    fn resolve_with(r: &mut Resolver<'_>) -> ConfigResult<Self> {
        let workspace = r
            .optional("PAGECAST_WORKSPACE", "worker.workspace")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("pagecast-workspace"));

        let build_timeout = match r.optional("PAGECAST_BUILD_TIMEOUT_SECS", "worker.build-timeout-secs")
        {
            Some(raw) => Some(Duration::from_secs(parse_value(
                "PAGECAST_BUILD_TIMEOUT_SECS",
                &raw,
            )?)),
            None => None,
        };

        let transfer_concurrency: usize = r.parse_or(
            "PAGECAST_TRANSFER_CONCURRENCY",
            "worker.transfer-concurrency",
            8,
        )?;
        if transfer_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "PAGECAST_TRANSFER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            workspace,
            retry_delay: Duration::from_secs(r.parse_or(
                "PAGECAST_RETRY_DELAY_SECS",
                "worker.retry-delay-secs",
                5,
            )?),
            npm: r
                .optional("PAGECAST_NPM", "worker.npm")
                .unwrap_or_else(|| "npm".to_string()),
            build_timeout,
            transfer_concurrency,
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::temp_dir().join("pagecast-workspace"),
            retry_delay: Duration::from_secs(5),
            npm: "npm".to_string(),
            build_timeout: None,
            transfer_concurrency: 8,
        }
    }
}

impl HttpConfig {
    fn resolve_with(r: &mut Resolver<'_>) -> ConfigResult<Self> {
        Ok(Self {
            api_addr: r.parse_or(
                "PAGECAST_API_ADDR",
                "http.api-addr",
                SocketAddr::from(([0, 0, 0, 0], 3000)),
            )?,
            edge_addr: r.parse_or(
                "PAGECAST_EDGE_ADDR",
                "http.edge-addr",
                SocketAddr::from(([0, 0, 0, 0], 3001)),
            )?,
        })
    }
}

/// Looks values up in the environment first, then the file, and records
/// every missing required value so they can be reported together.
struct Resolver<'a> {
    file: &'a FileConfig,
    env: &'a dyn Fn(&str) -> Option<String>,
    missing: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(file: &'a FileConfig, env: &'a dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            file,
            env,
            missing: Vec::new(),
        }
    }

    fn optional_env(&self, env_key: &str) -> Option<String> {
        (self.env)(env_key).filter(|v| !v.trim().is_empty())
    }

    fn optional(&self, env_key: &str, file_key: &str) -> Option<String> {
        self.optional_env(env_key)
            .or_else(|| self.file.get(file_key).map(str::to_string))
    }

    fn required(&mut self, env_key: &str, file_key: &str) -> String {
        match self.optional(env_key, file_key) {
            Some(value) => value,
            None => {
                self.missing.push(env_key.to_string());
                String::new()
            }
        }
    }

    fn required_env(&mut self, env_key: &str) -> String {
        match self.optional_env(env_key) {
            Some(value) => value,
            None => {
                self.missing.push(env_key.to_string());
                String::new()
            }
        }
    }

    fn parse_or<T>(&self, env_key: &str, file_key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(env_key, file_key) {
            Some(raw) => parse_value(env_key, &raw),
            None => Ok(default),
        }
    }

    fn finish(self) -> ConfigResult<()> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingField(self.missing.join(", ")))
        }
    }
}

fn parse_value<T>(field: &str, raw: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{:?}: {}", raw, e),
    })
}
