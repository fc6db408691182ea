//! Pure construction of the container topology for one run.
//!
//! Nothing here talks to the container runtime. A [`Plan`] is the ordered list
//! of containers to start, grouped into stages that respect dependency order;
//! [`resources`] lists what discovery publishes afterwards.

use std::{collections::BTreeMap as Map, fmt, time::Duration};

use crate::{
    config::{Config, DependencyConfig},
    identity::{RunIdentity, LABEL_PREFIX, LABEL_RESOURCE, LABEL_RUN, LABEL_SESSION},
    models::ContainerSpec,
};

mod broker;
mod service;
mod standalone;
mod stores;

pub use broker::{bootstrap_servers, BROKER_INTERNAL_PORT};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const SLOW_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// Stateful stores with no dependencies of their own.
    Databases,
    /// The broker cluster, preceded by its coordinator when there is one.
    Brokers,
    /// Everything that needs a reachable broker.
    BrokerDependents,
    /// Containers with neither dependencies nor dependents.
    Standalone,
    /// Service instances and ad-hoc containers, always last.
    Services,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Databases => "databases",
            StageKind::Brokers => "brokers",
            StageKind::BrokerDependents => "broker dependents",
            StageKind::Standalone => "standalone",
            StageKind::Services => "services",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct Stage {
    pub kind: StageKind,
    pub containers: Vec<ContainerSpec>,
}

#[derive(Clone, Debug)]
pub struct Plan {
    pub network: String,
    pub network_labels: Map<String, String>,
    pub stages: Vec<Stage>,
}

impl Plan {
    pub fn containers(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.stages.iter().flat_map(|stage| stage.containers.iter())
    }
}

/// A published `<key>.mapped.port` entry and where to find it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub key: String,
    pub container: String,
    pub port: u16,
    pub enabled: bool,
}

impl Resource {
    fn new<K: Into<String>>(key: K, port: u16, enabled: bool) -> Resource {
        let key = key.into();
        Resource {
            container: key.clone(),
            key,
            port,
            enabled,
        }
    }
}

/// Shared inputs of every container builder.
pub(crate) struct Context<'a> {
    pub config: &'a Config,
    pub identity: &'a RunIdentity,
}

impl<'a> Context<'a> {
    /// A spec carrying the run, session and resource labels.
    pub fn container(&self, logical_name: &str, image: String) -> ContainerSpec {
        ContainerSpec::new(self.identity.container_name(logical_name), logical_name, image)
            .label(LABEL_RUN, self.identity.run_label())
            .label(LABEL_PREFIX, self.identity.prefix.clone())
            .label(LABEL_SESSION, self.identity.session_id.clone())
            .label(LABEL_RESOURCE, logical_name)
    }

    /// A spec for one built-in dependency, exposing its configured port.
    pub fn dependency(
        &self,
        logical_name: &str,
        repository: &str,
        dependency: &DependencyConfig,
    ) -> ContainerSpec {
        self.container(
            logical_name,
            format!("{}:{}", repository, dependency.image_tag),
        )
        .port(dependency.port)
        .logging(dependency.container_logging_enabled)
    }
}

pub fn build(config: &Config, identity: &RunIdentity) -> Plan {
    let context = Context { config, identity };

    let mut network_labels = Map::new();
    network_labels.insert(LABEL_RUN.to_string(), identity.run_label());
    network_labels.insert(LABEL_PREFIX.to_string(), identity.prefix.clone());
    network_labels.insert(LABEL_SESSION.to_string(), identity.session_id.clone());

    let stages = vec![
        Stage {
            kind: StageKind::Databases,
            containers: stores::containers(&context),
        },
        Stage {
            kind: StageKind::Brokers,
            containers: broker::brokers(&context),
        },
        Stage {
            kind: StageKind::BrokerDependents,
            containers: broker::dependents(&context),
        },
        Stage {
            kind: StageKind::Standalone,
            containers: standalone::containers(&context),
        },
        Stage {
            kind: StageKind::Services,
            containers: service::containers(&context),
        },
    ];

    Plan {
        network: identity.network_name(),
        network_labels,
        stages: stages
            .into_iter()
            .filter(|stage| !stage.containers.is_empty())
            .collect(),
    }
}

/// Every dependency resource discovery looks for, enabled or not.
///
/// The primary service instance and ad-hoc containers are found by label and
/// are not part of this list.
pub fn resources(config: &Config) -> Vec<Resource> {
    let mut resources = broker::resources(config);
    resources.extend(stores::resources(config));
    resources.extend(standalone::resources(config));
    resources.extend(service::resources(config));
    resources
}
