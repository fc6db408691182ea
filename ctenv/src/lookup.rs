use serde::Serialize;
use std::collections::BTreeMap as Map;

pub const DOCKER_HOST_KEY: &str = "docker.host";
const MAPPED_PORT_SUFFIX: &str = ".mapped.port";

pub fn mapped_port_key(resource: &str) -> String {
    format!("{}{}", resource, MAPPED_PORT_SUFFIX)
}

/// A container port and the host port the runtime bound it to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub resource: String,
    pub container_port: u16,
    pub host_port: u16,
}

/// Connection coordinates published for test clients.
///
/// Holds one `<resource>.mapped.port` entry per discovered mapping plus
/// `docker.host`. Serialises as a flat object of those keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Lookup {
    #[serde(flatten)]
    entries: Map<String, String>,
    #[serde(skip)]
    mappings: Vec<PortMapping>,
}

impl Lookup {
    pub fn new<S: Into<String>>(docker_host: S) -> Lookup {
        let mut entries = Map::new();
        entries.insert(DOCKER_HOST_KEY.to_string(), docker_host.into());

        Lookup {
            entries,
            mappings: Vec::new(),
        }
    }

    pub(crate) fn publish(&mut self, mapping: PortMapping) {
        self.entries.insert(
            mapped_port_key(&mapping.resource),
            mapping.host_port.to_string(),
        );
        self.mappings.retain(|known| known.resource != mapping.resource);
        self.mappings.push(mapping);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn docker_host(&self) -> &str {
        self.get(DOCKER_HOST_KEY).unwrap_or("localhost")
    }

    pub fn mapped_port(&self, resource: &str) -> Option<u16> {
        self.get(&mapped_port_key(resource))
            .and_then(|port| port.parse().ok())
    }

    /// `http://<docker.host>:<mapped port>` of an HTTP resource.
    pub fn http_url(&self, resource: &str) -> Option<String> {
        self.mapped_port(resource)
            .map(|port| format!("http://{}:{}", self.docker_host(), port))
    }

    pub fn mappings(&self) -> &[PortMapping] {
        &self.mappings
    }

    pub fn entries(&self) -> &Map<String, String> {
        &self.entries
    }

    pub fn to_properties(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
