//! Deployment job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

const MAX_LEN: usize = 128;
const GENERATED_LEN: usize = 12;

/// Identifier of a deployment job.
///
/// The id is the object-store prefix of the job's files and the subdomain label
/// its artifact is served from, so it may not contain path separators, dots,
/// whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id: twelve lowercase hex characters.
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(GENERATED_LEN);
        Self(id)
    }

    /// Validate and wrap an id received from outside the process.
    pub fn parse(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidInput("job id is empty".to_string()));
        }
        if raw.len() > MAX_LEN {
            return Err(Error::InvalidInput(format!(
                "job id longer than {} bytes",
                MAX_LEN
            )));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| matches!(c, '/' | '\\' | '.') || c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidInput(format!(
                "job id {:?} contains forbidden character {:?}",
                raw, c
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
