//! Finds the live containers of a run and reads back their host ports.

use log::{debug, info};
use std::collections::BTreeSet as Set;

use crate::{
    config::Config,
    error::{DiscoveryError, Error, Result},
    identity::{RunIdentity, LABEL_ADDITIONAL, LABEL_MAIN, LABEL_RUN},
    lookup::{Lookup, PortMapping},
    models::{Container, ContainerFilter},
    plan::{self, Resource},
    services::ContainerBackend,
};

pub fn discover(
    backend: &mut dyn ContainerBackend,
    config: &Config,
    identity: &RunIdentity,
) -> Result<Lookup> {
    let host = backend
        .docker_host()
        .map_err(|err| Error::runtime("resolving the docker host", err))?;
    let mut lookup = Lookup::new(host);

    discover_primary(backend, config, identity, &mut lookup)?;

    for resource in plan::resources(config) {
        discover_resource(backend, identity, &resource, &mut lookup)?;
    }

    discover_additional(backend, config, identity, &mut lookup)?;

    info!("discovered {} port mapping(s)", lookup.mappings().len());
    Ok(lookup)
}

fn list(backend: &mut dyn ContainerBackend, filter: &ContainerFilter) -> Result<Vec<Container>> {
    backend
        .list_containers(filter)
        .map_err(|err| Error::runtime("listing containers", err))
}

fn mapping(resource: &str, container: &Container, port: u16) -> Result<PortMapping> {
    let host_port = container
        .host_port(port)
        .ok_or_else(|| DiscoveryError::PortNotMapped {
            resource: resource.to_string(),
            container: container.name.0.clone(),
            port,
        })?;

    debug!("{} ({}) {} -> {}", resource, container.name.0, port, host_port);
    Ok(PortMapping {
        resource: resource.to_string(),
        container_port: port,
        host_port,
    })
}

fn ambiguous(resource: &str, name: &str, candidates: &[Container]) -> Error {
    DiscoveryError::Ambiguous {
        resource: resource.to_string(),
        name: name.to_string(),
        candidates: candidates
            .iter()
            .map(|container| container.name.0.clone())
            .collect(),
    }
    .into()
}

fn discover_primary(
    backend: &mut dyn ContainerBackend,
    config: &Config,
    identity: &RunIdentity,
    lookup: &mut Lookup,
) -> Result<()> {
    let name_prefix = format!("{}-", identity.prefix);
    let filter = ContainerFilter::new()
        .name(name_prefix.clone())
        .label(LABEL_MAIN, identity.main_label.clone())
        .label(LABEL_RUN, identity.run_label());

    let candidates = list(backend, &filter)?
        .into_iter()
        .filter(|container| container.name.0.starts_with(&name_prefix))
        .collect::<Vec<_>>();

    let service = &config.service.name;
    let expected = format!("{}*", name_prefix);
    match candidates.as_slice() {
        [] => Err(DiscoveryError::NotFound {
            resource: service.clone(),
            name: expected,
        }
        .into()),
        [container] => {
            lookup.publish(mapping(service, container, config.service.port)?);
            Ok(())
        }
        _ => Err(ambiguous(service, &expected, &candidates)),
    }
}

/// Substring match on the expected name, narrowed to the exact name when the
/// substring is shared with other containers.
fn discover_resource(
    backend: &mut dyn ContainerBackend,
    identity: &RunIdentity,
    resource: &Resource,
    lookup: &mut Lookup,
) -> Result<()> {
    let expected = identity.container_name(&resource.container).0;
    let mut candidates = list(backend, &ContainerFilter::new().name(expected.clone()))?;

    if candidates.len() > 1 {
        candidates.retain(|container| container.name.0 == expected);
    }

    match candidates.as_slice() {
        [] if resource.enabled => Err(DiscoveryError::NotFound {
            resource: resource.key.clone(),
            name: expected,
        }
        .into()),
        [] => {
            info!("{} is disabled and not running", resource.key);
            Ok(())
        }
        [container] if resource.enabled => {
            lookup.publish(mapping(&resource.key, container, resource.port)?);
            Ok(())
        }
        [container] => {
            info!(
                "{} is disabled, ignoring running container {}",
                resource.key, container.name.0
            );
            Ok(())
        }
        _ => Err(ambiguous(&resource.key, &expected, &candidates)),
    }
}

/// Ad-hoc containers are matched by label; any labelled container of this run
/// that is not configured is stale state.
fn discover_additional(
    backend: &mut dyn ContainerBackend,
    config: &Config,
    identity: &RunIdentity,
    lookup: &mut Lookup,
) -> Result<()> {
    let filter = ContainerFilter::new()
        .has_label(LABEL_ADDITIONAL)
        .label(LABEL_RUN, identity.run_label());
    let containers = list(backend, &filter)?;

    let mut found = Set::new();
    for container in containers.iter() {
        let name = container
            .labels
            .get(LABEL_ADDITIONAL)
            .cloned()
            .unwrap_or_default();

        match config
            .additional_containers
            .iter()
            .find(|additional| additional.name == name)
        {
            Some(additional) => {
                lookup.publish(mapping(&name, container, additional.port)?);
                found.insert(name);
            }
            None => {
                return Err(DiscoveryError::UnexpectedAdditional {
                    name,
                    container: container.name.0.clone(),
                }
                .into())
            }
        }
    }

    for additional in config.additional_containers.iter() {
        if !found.contains(&additional.name) {
            return Err(DiscoveryError::NotFound {
                resource: additional.name.clone(),
                name: identity.container_name(&additional.name).0,
            }
            .into());
        }
    }

    Ok(())
}
