use anyhow::Context as _;
use log::{debug, info, warn};
use std::collections::BTreeSet as Set;

use crate::{
    error::{Error, Result},
    identity::{RunIdentity, LABEL_PREFIX, LABEL_RUN},
    models::{ContainerFilter, ContainerId, ContainerName, ContainerSpec},
    plan::{Plan, Stage},
    services::ContainerBackend,
};

/// Mode of the start-up script uploaded into broker containers.
const SCRIPT_MODE: u32 = 0o755;

/// Starts containers one at a time and remembers what it started.
pub struct Controller {
    backend: Box<dyn ContainerBackend>,
    started: Vec<(ContainerName, ContainerId)>,
    network: Option<String>,
}

impl Controller {
    pub fn new(backend: Box<dyn ContainerBackend>) -> Controller {
        Controller {
            backend,
            started: Vec::new(),
            network: None,
        }
    }

    pub fn backend(&mut self) -> &mut dyn ContainerBackend {
        self.backend.as_mut()
    }

    /// Containers started by this controller, in start order.
    pub fn started(&self) -> &[(ContainerName, ContainerId)] {
        &self.started
    }

    pub fn started_id(&self, name: &ContainerName) -> Option<&ContainerId> {
        self.started
            .iter()
            .find(|(started, _)| started == name)
            .map(|(_, id)| id)
    }

    pub fn prepare_network(&mut self, plan: &Plan) -> Result<()> {
        info!("preparing network {}", plan.network);
        self.backend
            .ensure_network(&plan.network, &plan.network_labels)
            .map_err(|err| Error::runtime("creating the network", err))?;
        self.network = Some(plan.network.clone());
        Ok(())
    }

    /// Starts every container of the stage in order, each one ready before
    /// the next is created.
    pub fn start_stage(&mut self, stage: &Stage, network: &str) -> Result<()> {
        info!("starting {} ({} container(s))", stage.kind, stage.containers.len());

        for spec in stage.containers.iter() {
            self.start_container(spec, network)?;
        }

        Ok(())
    }

    pub fn start_container(&mut self, spec: &ContainerSpec, network: &str) -> Result<ContainerId> {
        self.provision(spec, network)
            .map_err(|err| Error::provision(spec.name.0.clone(), err))
    }

    fn provision(&mut self, spec: &ContainerSpec, network: &str) -> anyhow::Result<ContainerId> {
        info!("creating container {} from {}", spec.name.0, spec.image);
        let id = self.backend.create_container(spec, network)?;
        self.started.push((spec.name.clone(), id.clone()));

        self.backend.start_container(&id)?;

        if let Some(script) = &spec.startup_script {
            let host = self.backend.docker_host()?;
            let port = self.backend.mapped_port(&id, script.port)?;
            debug!(
                "uploading {} to {} advertising {}:{}",
                script.path, spec.name.0, host, port
            );
            self.backend
                .copy_file(&id, &script.path, script.render(&host, port).as_bytes(), SCRIPT_MODE)
                .with_context(|| format!("could not upload {}", script.path))?;
        }

        if spec.logging {
            self.backend.follow_logs(&id, &spec.name.0)?;
        }

        self.backend
            .wait_until_ready(&id, &spec.readiness, spec.startup_timeout)
            .with_context(|| {
                format!(
                    "{} did not become ready within {}s",
                    spec.name.0,
                    spec.startup_timeout.as_secs()
                )
            })?;
        info!("container {} is ready", spec.name.0);

        Ok(id)
    }

    /// Removes what this controller started, newest first, then its network.
    pub fn teardown(&mut self) -> Result<()> {
        while let Some((name, id)) = self.started.pop() {
            info!("removing container {}", name.0);
            self.backend
                .remove_container(&id)
                .map_err(|err| Error::runtime("removing containers", err))?;
        }

        if let Some(network) = self.network.take() {
            info!("removing network {}", network);
            self.backend
                .remove_network(&network)
                .map_err(|err| Error::runtime("removing the network", err))?;
        }

        Ok(())
    }

    /// Removes every container and network left behind by any run sharing
    /// the identity's prefix. Returns the number of containers removed.
    pub fn remove_runs(&mut self, identity: &RunIdentity) -> Result<usize> {
        let containers = self
            .backend
            .list_containers(
                &ContainerFilter::new()
                    .label(LABEL_PREFIX, identity.prefix.clone())
                    .has_label(LABEL_RUN)
                    .include_stopped(),
            )
            .map_err(|err| Error::runtime("listing containers", err))?;

        let mut networks = Set::new();
        let mut removed = 0;
        for container in containers.iter() {
            let run_label = match container.labels.get(LABEL_RUN) {
                Some(run_label) if identity.owns_run_label(run_label) => run_label,
                _ => continue,
            };

            info!("removing container {}", container.name.0);
            self.backend
                .remove_container(&container.id)
                .map_err(|err| Error::runtime("removing containers", err))?;
            removed += 1;

            if let Some(network) = identity.network_for_run_label(run_label) {
                networks.insert(network);
            }
        }

        for network in networks {
            info!("removing network {}", network);
            if let Err(err) = self.backend.remove_network(&network) {
                warn!("could not remove network {}: {:#}", network, err);
            }
        }

        Ok(removed)
    }
}
