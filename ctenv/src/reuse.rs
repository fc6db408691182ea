use log::{info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    hasher,
    identity::{RunIdentity, LABEL_HASH, LABEL_MAIN, LABEL_REAPER, LABEL_RUN},
    models::ContainerFilter,
    services::ContainerBackend,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// A previous environment is up and serves this run as is.
    Reuse,
    /// Start everything from scratch.
    Provision,
}

/// Decides between reusing everything and provisioning everything.
///
/// Reuse needs a running container carrying the main label and this run's
/// run label under its prefix, and no running reaper. A live reaper means the
/// previous run is still being managed and may be torn down at any moment.
pub fn decide(
    backend: &mut dyn ContainerBackend,
    config: &Config,
    identity: &RunIdentity,
) -> Result<Decision> {
    if config.container.append_group_id {
        info!("group id {:?} isolates this run, provisioning", identity.group_id);
        return Ok(Decision::Provision);
    }

    let name_prefix = format!("{}-", identity.prefix);
    let main = backend
        .list_containers(
            &ContainerFilter::new()
                .name(name_prefix.clone())
                .label(LABEL_MAIN, identity.main_label.clone())
                .label(LABEL_RUN, identity.run_label()),
        )
        .map_err(|err| Error::runtime("looking for a previous environment", err))?
        .into_iter()
        .filter(|container| container.name.0.starts_with(&name_prefix))
        .collect::<Vec<_>>();

    if main.is_empty() {
        info!("no previous environment found, provisioning");
        return Ok(Decision::Provision);
    }

    let reapers = backend
        .list_containers(&ContainerFilter::new().has_label(LABEL_REAPER))
        .map_err(|err| Error::runtime("looking for a running reaper", err))?;

    if !reapers.is_empty() {
        info!(
            "found {} but a reaper is running, provisioning",
            main[0].name.0
        );
        return Ok(Decision::Provision);
    }

    let fingerprint = hasher::fingerprint(config);
    for container in main.iter() {
        if container.labels.get(LABEL_HASH) != Some(&fingerprint) {
            warn!(
                "reusing {} although it was started with a different configuration",
                container.name.0
            );
        }
    }

    info!("reusing the environment around {}", main[0].name.0);
    Ok(Decision::Reuse)
}
