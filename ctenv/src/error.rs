use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way a run can fail. None of them are retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("failed to provision container {container}")]
    Provision {
        container: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create topics {topics:?}")]
    Bootstrap {
        topics: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("container runtime error while {action}")]
    Runtime {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn provision<S: Into<String>>(container: S, source: anyhow::Error) -> Error {
        Error::Provision {
            container: container.into(),
            source,
        }
    }

    pub(crate) fn runtime(action: &'static str, source: anyhow::Error) -> Error {
        Error::Runtime { action, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {path:?} could not be read")]
    FileNotReadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file {path:?} must end in .properties, .yml or .yaml")]
    UnsupportedExtension { path: PathBuf },

    #[error("configuration file {path:?} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("configuration file {path:?} contains unknown keys: {}", .keys.join(", "))]
    UnknownKeys { path: PathBuf, keys: Vec<String> },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("malformed key/value pair {pair:?} in {key}, expected exactly one '='")]
    MalformedPair { key: String, pair: String },

    #[error("additional container {entry:?} has {fields} fields, expected 5 (name,port,debugPort,imageTag,loggingEnabled)")]
    MalformedAdditionalContainer { entry: String, fields: usize },
}

impl ConfigError {
    pub(crate) fn invalid<K: Into<String>, V: Into<String>, R: ToString>(
        key: K,
        value: V,
        reason: R,
    ) -> ConfigError {
        ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("{resource} requires {required} to be enabled")]
    MissingDependency {
        resource: &'static str,
        required: &'static str,
    },

    #[error("{first} and {second} cannot both be enabled")]
    MutuallyExclusive {
        first: &'static str,
        second: &'static str,
    },

    #[error("{left} ({left_value}) must not exceed {right} ({right_value})")]
    Exceeds {
        left: &'static str,
        left_value: u32,
        right: &'static str,
        right_value: u32,
    },

    #[error("{name} must be at least {min}, got {value}")]
    TooSmall {
        name: &'static str,
        value: u32,
        min: u32,
    },

    #[error("{resource} does not support {feature}")]
    Unsupported {
        resource: &'static str,
        feature: String,
    },

    #[error("additional container name {0:?} is used more than once")]
    DuplicateName(String),

    #[error("{count} instance(s) need debug ports {first} to {last}, past the highest port 65535")]
    PortRangeOverflow { first: u16, count: u32, last: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no running container found for {resource} (expected name {name:?})")]
    NotFound { resource: String, name: String },

    #[error("{} containers match {resource} (expected name {name:?}): {}", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        resource: String,
        name: String,
        candidates: Vec<String>,
    },

    #[error("container {container} for {resource} has no host port bound to {port}")]
    PortNotMapped {
        resource: String,
        container: String,
        port: u16,
    },

    #[error("additional container {container} ({name:?}) is not configured for this run")]
    UnexpectedAdditional { name: String, container: String },
}
