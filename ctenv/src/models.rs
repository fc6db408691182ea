use std::{collections::BTreeMap as Map, time::Duration};

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerName(pub String);

/// A container as reported by the runtime when listing.
#[derive(Clone, Debug)]
pub struct Container {
    pub id: ContainerId,
    pub name: ContainerName,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: Map<String, String>,
    pub ports: Vec<PublishedPort>,
}

impl Container {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .filter(|port| port.container_port == container_port)
            .find_map(|port| port.host_port)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PublishedPort {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(status: &str) -> ContainerStatus {
        match status {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "exited" => ContainerStatus::Exited,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// Filter applied when listing containers.
///
/// `name` follows the runtime's semantics, a substring match, never an exact
/// one. Labels with no value match on key presence.
#[derive(Clone, Debug, Default)]
pub struct ContainerFilter {
    pub name: Option<String>,
    pub labels: Vec<(String, Option<String>)>,
    pub all: bool,
}

impl ContainerFilter {
    pub fn new() -> ContainerFilter {
        ContainerFilter::default()
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> ContainerFilter {
        self.name = Some(name.into());
        self
    }

    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> ContainerFilter {
        self.labels.push((key.into(), Some(value.into())));
        self
    }

    pub fn has_label<K: Into<String>>(mut self, key: K) -> ContainerFilter {
        self.labels.push((key.into(), None));
        self
    }

    pub fn include_stopped(mut self) -> ContainerFilter {
        self.all = true;
        self
    }

    pub fn matches(&self, container: &Container) -> bool {
        if !self.all && container.status != ContainerStatus::Running {
            return false;
        }

        if let Some(name) = &self.name {
            if !container.name.0.contains(name.as_str()) {
                return false;
            }
        }

        self.labels.iter().all(|(key, value)| {
            match (container.labels.get(key), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }
}

/// How the orchestrator decides a started container is usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The runtime reports the container running.
    Running,
    /// An HTTP GET against the host port mapped to `port` answers `status`.
    Http { port: u16, path: String, status: u16 },
    /// The log stream matched `pattern` at least `times` times.
    LogMessage { pattern: String, times: usize },
    /// The host port mapped to `port` accepts TCP connections.
    ListeningPort { port: u16 },
}

/// A script rendered after the container runs and before readiness is awaited.
///
/// `%HOST%` and `%PORT%` are replaced with the daemon host and the host port
/// mapped to `port`. The container's command waits for `path` to appear.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartupScript {
    pub path: String,
    pub port: u16,
    pub template: String,
}

impl StartupScript {
    pub fn render(&self, host: &str, mapped_port: u16) -> String {
        self.template
            .replace("%HOST%", host)
            .replace("%PORT%", &mapped_port.to_string())
    }

    pub fn wait_command(&self) -> String {
        format!(
            "while [ ! -f {path} ]; do sleep 0.1; done; {path}",
            path = self.path
        )
    }
}

/// Runtime-agnostic description of one container to start.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub resource: String,
    pub alias: String,
    pub image: String,
    pub ports: Vec<u16>,
    pub env: Map<String, String>,
    pub binds: Vec<String>,
    pub labels: Map<String, String>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub readiness: Readiness,
    pub startup_timeout: Duration,
    pub startup_script: Option<StartupScript>,
    pub logging: bool,
}

impl ContainerSpec {
    pub fn new<R: Into<String>, I: Into<String>>(
        name: ContainerName,
        resource: R,
        image: I,
    ) -> ContainerSpec {
        let resource = resource.into();
        ContainerSpec {
            name,
            alias: resource.clone(),
            resource,
            image: image.into(),
            ports: Vec::new(),
            env: Map::new(),
            binds: Vec::new(),
            labels: Map::new(),
            entrypoint: None,
            command: None,
            readiness: Readiness::Running,
            startup_timeout: Duration::from_secs(60),
            startup_script: None,
            logging: false,
        }
    }

    pub fn port(mut self, port: u16) -> ContainerSpec {
        self.ports.push(port);
        self
    }

    pub fn env<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> ContainerSpec {
        self.env.insert(key.into(), value.to_string());
        self
    }

    pub fn envs<'a, I>(mut self, env: I) -> ContainerSpec
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> ContainerSpec {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `host_path:container_path`
    pub fn bind(mut self, host_path: &str, container_path: &str) -> ContainerSpec {
        self.binds.push(format!("{}:{}", host_path, container_path));
        self
    }

    pub fn command<I, S>(mut self, command: I) -> ContainerSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn readiness(mut self, readiness: Readiness, timeout: Duration) -> ContainerSpec {
        self.readiness = readiness;
        self.startup_timeout = timeout;
        self
    }

    pub fn logging(mut self, enabled: bool) -> ContainerSpec {
        self.logging = enabled;
        self
    }

    /// Wraps the command so the container idles until `script` is uploaded.
    pub fn startup_script(mut self, script: StartupScript) -> ContainerSpec {
        self.entrypoint = Some(vec!["sh".into(), "-c".into()]);
        self.command = Some(vec![script.wait_command()]);
        self.startup_script = Some(script);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, running: bool, labels: &[(&str, &str)]) -> Container {
        Container {
            id: ContainerId(format!("id-{}", name)),
            name: ContainerName(name.into()),
            image: "busybox".into(),
            status: if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Exited
            },
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ports: vec![PublishedPort {
                container_port: 9093,
                host_port: Some(49153),
            }],
        }
    }

    #[test]
    fn filter_matches_name_substring_and_labels() {
        let kafka = container("ct-kafka-schema-registry", true, &[("io.ctenv.run", "ct")]);

        assert!(ContainerFilter::new().name("ct-kafka").matches(&kafka));
        assert!(ContainerFilter::new()
            .label("io.ctenv.run", "ct")
            .matches(&kafka));
        assert!(ContainerFilter::new().has_label("io.ctenv.run").matches(&kafka));
        assert!(!ContainerFilter::new()
            .label("io.ctenv.run", "other")
            .matches(&kafka));
        assert!(!ContainerFilter::new().name("postgres").matches(&kafka));
    }

    #[test]
    fn filter_skips_stopped_unless_asked() {
        let stopped = container("ct-postgres", false, &[]);

        assert!(!ContainerFilter::new().matches(&stopped));
        assert!(ContainerFilter::new().include_stopped().matches(&stopped));
    }

    #[test]
    fn host_port_lookup() {
        let kafka = container("ct-kafka", true, &[]);
        assert_eq!(kafka.host_port(9093), Some(49153));
        assert_eq!(kafka.host_port(9092), None);
    }

    #[test]
    fn startup_script_rendering() {
        let script = StartupScript {
            path: "/ct_start.sh".into(),
            port: 9093,
            template: "EXTERNAL://%HOST%:%PORT%".into(),
        };

        assert_eq!(script.render("localhost", 32771), "EXTERNAL://localhost:32771");
        assert_eq!(
            script.wait_command(),
            "while [ ! -f /ct_start.sh ]; do sleep 0.1; done; /ct_start.sh"
        );
    }
}
