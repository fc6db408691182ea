//! Provisions a containerised test environment around one service under test
//! and publishes the host ports its dependencies ended up on.

pub mod backends;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod lookup;
pub mod models;
pub mod plan;
pub mod reuse;
pub mod services;
pub mod topology;

pub use config::{Config, ConfigLoader};
pub use environment::Environment;
pub use error::{Error, Result};
pub use lookup::{Lookup, PortMapping};
pub use services::ContainerBackend;
