use anyhow::Result;
use std::{collections::BTreeMap as Map, time::Duration};

use crate::models::{Container, ContainerFilter, ContainerId, ContainerSpec, ExecOutput, Readiness};

/// The container runtime as seen by the orchestrator.
///
/// Every call blocks until the runtime has answered. Implementations own any
/// async machinery they need.
pub trait ContainerBackend {
    fn list_containers(&mut self, filter: &ContainerFilter) -> Result<Vec<Container>>;

    /// Creates the network unless one with the same name already exists.
    fn ensure_network(&mut self, name: &str, labels: &Map<String, String>) -> Result<()>;

    fn remove_network(&mut self, name: &str) -> Result<()>;

    fn create_container(&mut self, spec: &ContainerSpec, network: &str) -> Result<ContainerId>;

    /// Starts the container and returns once the runtime reports it running.
    fn start_container(&mut self, id: &ContainerId) -> Result<()>;

    fn remove_container(&mut self, id: &ContainerId) -> Result<()>;

    fn mapped_port(&mut self, id: &ContainerId, container_port: u16) -> Result<u16>;

    fn copy_file(&mut self, id: &ContainerId, path: &str, contents: &[u8], mode: u32)
        -> Result<()>;

    fn exec(&mut self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput>;

    fn wait_until_ready(
        &mut self,
        id: &ContainerId,
        readiness: &Readiness,
        timeout: Duration,
    ) -> Result<()>;

    /// Forwards the container's output into the log facade until it exits.
    fn follow_logs(&mut self, id: &ContainerId, name: &str) -> Result<()>;

    /// Starts the runtime's cleanup sentinel for every container carrying the
    /// given label and keeps it armed for the lifetime of the backend.
    fn start_reaper(&mut self, label: (&str, &str)) -> Result<()>;

    /// Address under which the daemon publishes container ports.
    fn docker_host(&mut self) -> Result<String>;
}
