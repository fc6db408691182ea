//! In-memory container runtime shared by the integration tests.
//!
//! Clones of a [`FakeBackend`] share one state, so a test can hand a boxed
//! clone to the engine and inspect what happened afterwards.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use std::{
    cell::{Ref, RefCell},
    collections::{BTreeMap as Map, BTreeSet as Set},
    rc::Rc,
    time::Duration,
};

use ctenv::{
    identity::LABEL_REAPER,
    models::{
        Container, ContainerFilter, ContainerId, ContainerName, ContainerSpec, ContainerStatus,
        ExecOutput, PublishedPort, Readiness,
    },
    ContainerBackend,
};

const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub container: ContainerName,
    pub path: String,
    pub contents: String,
    pub mode: u32,
}

#[derive(Debug, Default)]
pub struct State {
    pub containers: Vec<Container>,
    pub networks: Set<String>,
    pub execs: Vec<(ContainerName, Vec<String>)>,
    pub uploads: Vec<Upload>,
    pub followed: Vec<String>,
    pub reapers: Vec<(String, String)>,
    pub removed: Vec<ContainerName>,
    pub unready: Set<String>,
    pub exec_exit_code: i64,
    next_id: usize,
    next_port: u16,
}

impl State {
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers
            .iter()
            .find(|container| container.name.0 == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.containers
            .iter()
            .map(|container| container.name.0.as_str())
            .collect()
    }

    fn by_id(&self, id: &ContainerId) -> Result<&Container> {
        self.containers
            .iter()
            .find(|container| &container.id == id)
            .ok_or_else(|| anyhow!("no such container: {}", id.0))
    }

    fn by_id_mut(&mut self, id: &ContainerId) -> Result<&mut Container> {
        self.containers
            .iter_mut()
            .find(|container| &container.id == id)
            .ok_or_else(|| anyhow!("no such container: {}", id.0))
    }

    fn allocate_port(&mut self) -> u16 {
        if self.next_port == 0 {
            self.next_port = FIRST_HOST_PORT;
        }
        let port = self.next_port;
        self.next_port += 1;
        port
    }

    fn allocate_id(&mut self) -> ContainerId {
        self.next_id += 1;
        ContainerId(format!("fake{:04}", self.next_id))
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<State>>,
}

impl FakeBackend {
    pub fn new() -> FakeBackend {
        FakeBackend::default()
    }

    pub fn state(&self) -> Ref<State> {
        self.state.borrow()
    }

    pub fn boxed(&self) -> Box<dyn ContainerBackend> {
        Box::new(self.clone())
    }

    /// Makes readiness of the named container fail.
    pub fn unready(&self, name: &str) {
        self.state.borrow_mut().unready.insert(name.to_string());
    }

    pub fn exec_exit_code(&self, code: i64) {
        self.state.borrow_mut().exec_exit_code = code;
    }

    pub fn seed_network(&self, name: &str) {
        self.state.borrow_mut().networks.insert(name.to_string());
    }

    /// Adds a container as if an earlier run had left it behind.
    pub fn seed(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        ports: &[(u16, u16)],
        running: bool,
    ) -> ContainerId {
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();

        state.containers.push(Container {
            id: id.clone(),
            name: ContainerName(name.to_string()),
            image: "seeded:latest".to_string(),
            status: if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Exited
            },
            labels: labels
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            ports: ports
                .iter()
                .map(|(container_port, host_port)| PublishedPort {
                    container_port: *container_port,
                    host_port: Some(*host_port),
                })
                .collect(),
        });

        id
    }
}

impl ContainerBackend for FakeBackend {
    fn list_containers(&mut self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        Ok(self
            .state
            .borrow()
            .containers
            .iter()
            .filter(|container| filter.matches(container))
            .cloned()
            .collect())
    }

    fn ensure_network(&mut self, name: &str, _labels: &Map<String, String>) -> Result<()> {
        self.state.borrow_mut().networks.insert(name.to_string());
        Ok(())
    }

    fn remove_network(&mut self, name: &str) -> Result<()> {
        self.state.borrow_mut().networks.remove(name);
        Ok(())
    }

    fn create_container(&mut self, spec: &ContainerSpec, network: &str) -> Result<ContainerId> {
        let mut state = self.state.borrow_mut();
        if !state.networks.contains(network) {
            bail!("network {} does not exist", network);
        }
        if state.container(&spec.name.0).is_some() {
            bail!("container name {} is already in use", spec.name.0);
        }

        let id = state.allocate_id();
        let ports = spec
            .ports
            .iter()
            .map(|port| PublishedPort {
                container_port: *port,
                host_port: Some(state.allocate_port()),
            })
            .collect();

        state.containers.push(Container {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            status: ContainerStatus::Created,
            labels: spec.labels.clone(),
            ports,
        });

        Ok(id)
    }

    fn start_container(&mut self, id: &ContainerId) -> Result<()> {
        self.state.borrow_mut().by_id_mut(id)?.status = ContainerStatus::Running;
        Ok(())
    }

    fn remove_container(&mut self, id: &ContainerId) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let name = state.by_id(id)?.name.clone();
        state.containers.retain(|container| &container.id != id);
        state.removed.push(name);
        Ok(())
    }

    fn mapped_port(&mut self, id: &ContainerId, container_port: u16) -> Result<u16> {
        self.state
            .borrow()
            .by_id(id)?
            .host_port(container_port)
            .ok_or_else(|| anyhow!("port {} is not published", container_port))
    }

    fn copy_file(&mut self, id: &ContainerId, path: &str, contents: &[u8], mode: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let container = state.by_id(id)?.name.clone();
        state.uploads.push(Upload {
            container,
            path: path.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
            mode,
        });
        Ok(())
    }

    fn exec(&mut self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        let mut state = self.state.borrow_mut();
        let container = state.by_id(id)?.name.clone();
        state.execs.push((container, cmd.to_vec()));

        Ok(ExecOutput {
            exit_code: state.exec_exit_code,
            ..Default::default()
        })
    }

    fn wait_until_ready(
        &mut self,
        id: &ContainerId,
        readiness: &Readiness,
        _timeout: Duration,
    ) -> Result<()> {
        let state = self.state.borrow();
        let container = state.by_id(id)?;

        if state.unready.contains(&container.name.0) {
            bail!("{:?} never succeeded", readiness);
        }
        Ok(())
    }

    fn follow_logs(&mut self, _id: &ContainerId, name: &str) -> Result<()> {
        self.state.borrow_mut().followed.push(name.to_string());
        Ok(())
    }

    fn start_reaper(&mut self, label: (&str, &str)) -> Result<()> {
        self.state
            .borrow_mut()
            .reapers
            .push((label.0.to_string(), label.1.to_string()));
        self.seed("reaper", &[(LABEL_REAPER, "true")], &[(8080, 32700)], true);
        Ok(())
    }

    fn docker_host(&mut self) -> Result<String> {
        Ok("localhost".to_string())
    }
}
