use anyhow::{anyhow, bail, Context, Result};
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
        LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions,
    },
    errors::Error as DockerError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    network::{CreateNetworkOptions, ListNetworksOptions},
    service::{ContainerStateStatusEnum, EndpointSettings, HostConfig},
    Docker,
};
use futures::StreamExt;
use log::{debug, info};
use regex::Regex;
use std::{
    collections::{BTreeMap as Map, HashMap},
    env,
    future::Future,
    io::{BufRead, BufReader, Write},
    net::TcpStream as StdTcpStream,
    time::{Duration, Instant},
};
use tar::{Builder as TarBuilder, Header};
use tokio::{net::TcpStream, runtime::Runtime, time::sleep};
use url::Url;

use crate::{
    identity::LABEL_REAPER,
    models::{
        Container, ContainerFilter, ContainerId, ContainerName, ContainerSpec, ContainerStatus,
        ExecOutput, PublishedPort, Readiness,
    },
    services::ContainerBackend,
};

const REAPER_IMAGE: &str = "testcontainers/ryuk:0.11.0";
const REAPER_PORT: u16 = 8080;
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Log target container output is forwarded to.
pub const CONTAINER_LOG_TARGET: &str = "ctenv::container";

/// [`ContainerBackend`] on the Docker engine API.
///
/// Owns a small tokio runtime and drives every call to completion on it, so
/// callers stay synchronous.
pub struct DockerBackend {
    runtime: Runtime,
    docker: Docker,
    host: String,
    reaper: Option<StdTcpStream>,
}

impl DockerBackend {
    pub fn connect() -> Result<DockerBackend> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let docker = Docker::connect_with_local_defaults()
            .context("could not connect to the docker daemon")?;
        runtime
            .block_on(docker.ping())
            .context("the docker daemon did not answer")?;

        let host = docker_host_from_env(env::var("DOCKER_HOST").ok().as_deref());
        debug!("published ports are reachable on {}", host);

        Ok(DockerBackend {
            runtime,
            docker,
            host,
            reaper: None,
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Host of a `tcp://` daemon address, `localhost` for sockets.
pub fn docker_host_from_env(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|value| Url::parse(value).ok())
        .filter(|url| matches!(url.scheme(), "tcp" | "http" | "https"))
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_else(|| "localhost".to_string())
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn port_key(port: u16) -> String {
    format!("{}/tcp", port)
}

async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    match docker.inspect_image(image).await {
        Ok(_) => return Ok(()),
        Err(err) if is_not_found(&err) => (),
        Err(err) => return Err(err.into()),
    }

    info!("pulling image {}", image);
    let options = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(progress) = stream.next().await {
        let progress = progress.with_context(|| format!("could not pull {}", image))?;
        if let Some(status) = progress.status {
            debug!("{}: {}", image, status);
        }
    }

    Ok(())
}

async fn host_port(docker: &Docker, id: &str, container_port: u16) -> Result<u16> {
    let inspect = docker
        .inspect_container(id, None::<InspectContainerOptions>)
        .await?;

    inspect
        .network_settings
        .and_then(|settings| settings.ports)
        .and_then(|mut ports| ports.remove(&port_key(container_port)))
        .flatten()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|binding| binding.host_port)
        .find_map(|port| port.parse().ok())
        .ok_or_else(|| anyhow!("port {} of {} is not published", container_port, id))
}

async fn wait_running(docker: &Docker, id: &str) -> Result<()> {
    let started = Instant::now();

    loop {
        let inspect = docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = inspect.state.unwrap_or_default();

        if state.running == Some(true) {
            return Ok(());
        }
        if state.status == Some(ContainerStateStatusEnum::EXITED) {
            bail!(
                "container {} exited with code {}",
                id,
                state.exit_code.unwrap_or(-1)
            );
        }
        if started.elapsed() > START_TIMEOUT {
            bail!("container {} was not running after {:?}", id, START_TIMEOUT);
        }

        sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_http(host: &str, port: u16, path: &str, status: u16) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("http://{}:{}{}", host, port, path);

    loop {
        match client.get(&url).send().await {
            Ok(response) if response.status().as_u16() == status => return Ok(()),
            Ok(response) => debug!("{} answered {}", url, response.status()),
            Err(err) => debug!("{} not reachable yet: {}", url, err),
        }
        sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_log(docker: &Docker, id: &str, pattern: &Regex, times: usize) -> Result<()> {
    let options = LogsOptions::<String> {
        follow: true,
        stdout: true,
        stderr: true,
        ..Default::default()
    };

    let mut seen = 0;
    let mut stream = docker.logs(id, Some(options));
    while let Some(output) = stream.next().await {
        let output = output?;
        seen += output
            .to_string()
            .lines()
            .filter(|line| pattern.is_match(line))
            .count();

        if seen >= times {
            return Ok(());
        }
    }

    bail!(
        "log stream of {} ended after {} of {} match(es) for {:?}",
        id,
        seen,
        times,
        pattern.as_str()
    )
}

async fn wait_for_port(host: &str, port: u16) -> Result<()> {
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(_) => return Ok(()),
            Err(err) => debug!("{}:{} not listening yet: {}", host, port, err),
        }
        sleep(POLL_INTERVAL).await;
    }
}

fn tar_single_file(path: &str, contents: &[u8], mode: u32) -> Result<Vec<u8>> {
    let mut header = Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_cksum();

    let mut tar = TarBuilder::new(Vec::new());
    tar.append_data(&mut header, path.trim_start_matches('/'), contents)?;
    Ok(tar.into_inner()?)
}

impl ContainerBackend for DockerBackend {
    fn list_containers(&mut self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        let mut filters = HashMap::new();
        if let Some(name) = &filter.name {
            filters.insert("name".to_string(), vec![name.clone()]);
        }
        if !filter.labels.is_empty() {
            let labels = filter
                .labels
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => format!("{}={}", key, value),
                    None => key.clone(),
                })
                .collect();
            filters.insert("label".to_string(), labels);
        }

        let options = ListContainersOptions {
            all: filter.all,
            filters,
            ..Default::default()
        };
        let summaries = self.block_on(self.docker.list_containers(Some(options)))?;

        let containers = summaries
            .into_iter()
            .map(|summary| {
                let name = summary
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .unwrap_or_default();

                Container {
                    id: ContainerId(summary.id.unwrap_or_default()),
                    name: ContainerName(name.trim_start_matches('/').to_string()),
                    image: summary.image.unwrap_or_default(),
                    status: ContainerStatus::parse(summary.state.as_deref().unwrap_or_default()),
                    labels: summary.labels.unwrap_or_default().into_iter().collect(),
                    ports: summary
                        .ports
                        .unwrap_or_default()
                        .into_iter()
                        .map(|port| PublishedPort {
                            container_port: port.private_port,
                            host_port: port.public_port,
                        })
                        .collect(),
                }
            })
            .filter(|container| filter.matches(container))
            .collect();

        Ok(containers)
    }

    fn ensure_network(&mut self, name: &str, labels: &Map<String, String>) -> Result<()> {
        let docker = &self.docker;

        self.block_on(async {
            let mut filters = HashMap::new();
            filters.insert("name".to_string(), vec![name.to_string()]);
            let existing = docker
                .list_networks(Some(ListNetworksOptions { filters }))
                .await?;

            if existing
                .iter()
                .any(|network| network.name.as_deref() == Some(name))
            {
                info!("reusing network {}", name);
                return Ok(());
            }

            let options = CreateNetworkOptions {
                name,
                driver: "bridge",
                labels: labels
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect(),
                ..Default::default()
            };
            docker.create_network(options).await?;
            info!("created network {}", name);
            Ok::<_, anyhow::Error>(())
        })
    }

    fn remove_network(&mut self, name: &str) -> Result<()> {
        match self.block_on(self.docker.remove_network(name)) {
            Ok(()) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn create_container(&mut self, spec: &ContainerSpec, network: &str) -> Result<ContainerId> {
        let docker = &self.docker;

        let exposed_ports = spec
            .ports
            .iter()
            .map(|port| (port_key(*port), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let mut endpoints = HashMap::new();
        endpoints.insert(
            network.to_string(),
            EndpointSettings {
                aliases: Some(vec![spec.alias.clone()]),
                ..Default::default()
            },
        );

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(
                spec.env
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect(),
            ),
            labels: Some(spec.labels.clone().into_iter().collect()),
            exposed_ports: Some(exposed_ports),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.command.clone(),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                binds: if spec.binds.is_empty() {
                    None
                } else {
                    Some(spec.binds.clone())
                },
                network_mode: Some(network.to_string()),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        let response = self.block_on(async {
            ensure_image(docker, &spec.image).await?;

            let options = CreateContainerOptions {
                name: spec.name.0.as_str(),
                platform: None,
            };
            let response = docker.create_container(Some(options), config).await?;
            Ok::<_, anyhow::Error>(response)
        })?;

        for warning in response.warnings.iter() {
            info!("{}: {}", spec.name.0, warning);
        }

        Ok(ContainerId(response.id))
    }

    fn start_container(&mut self, id: &ContainerId) -> Result<()> {
        let docker = &self.docker;

        self.block_on(async {
            docker
                .start_container(&id.0, None::<StartContainerOptions<String>>)
                .await?;
            wait_running(docker, &id.0).await
        })
    }

    fn remove_container(&mut self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.block_on(self.docker.remove_container(&id.0, Some(options))) {
            Ok(()) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn mapped_port(&mut self, id: &ContainerId, container_port: u16) -> Result<u16> {
        self.block_on(host_port(&self.docker, &id.0, container_port))
    }

    fn copy_file(&mut self, id: &ContainerId, path: &str, contents: &[u8], mode: u32) -> Result<()> {
        let archive = tar_single_file(path, contents, mode)?;
        let options = UploadToContainerOptions {
            path: "/",
            ..Default::default()
        };

        self.block_on(
            self.docker
                .upload_to_container(&id.0, Some(options), archive.into()),
        )?;
        Ok(())
    }

    fn exec(&mut self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        let docker = &self.docker;

        self.block_on(async {
            let options = CreateExecOptions {
                cmd: Some(cmd.to_vec()),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            };
            let exec = docker.create_exec(&id.0, options).await?;

            let mut output = ExecOutput::default();
            if let StartExecResults::Attached { output: mut stream, .. } =
                docker.start_exec(&exec.id, None).await?
            {
                while let Some(chunk) = stream.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        LogOutput::StdErr { message } => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        _ => (),
                    }
                }
            }

            output.exit_code = docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
            Ok::<_, anyhow::Error>(output)
        })
    }

    fn wait_until_ready(
        &mut self,
        id: &ContainerId,
        readiness: &Readiness,
        timeout: Duration,
    ) -> Result<()> {
        let docker = &self.docker;
        let host = self.host.as_str();

        let probe = async {
            match readiness {
                Readiness::Running => wait_running(docker, &id.0).await,
                Readiness::Http { port, path, status } => {
                    let port = host_port(docker, &id.0, *port).await?;
                    wait_for_http(host, port, path, *status).await
                }
                Readiness::LogMessage { pattern, times } => {
                    let pattern = Regex::new(pattern)
                        .with_context(|| format!("invalid log pattern {:?}", pattern))?;
                    wait_for_log(docker, &id.0, &pattern, *times).await
                }
                Readiness::ListeningPort { port } => {
                    let port = host_port(docker, &id.0, *port).await?;
                    wait_for_port(host, port).await
                }
            }
        };

        self.block_on(async { tokio::time::timeout(timeout, probe).await })
            .map_err(|_| anyhow!("timed out after {:?} waiting for {:?}", timeout, readiness))?
    }

    fn follow_logs(&mut self, id: &ContainerId, name: &str) -> Result<()> {
        let docker = self.docker.clone();
        let id = id.0.clone();
        let name = name.to_string();

        self.runtime.spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };

            let mut stream = docker.logs(&id, Some(options));
            while let Some(Ok(output)) = stream.next().await {
                for line in output.to_string().lines() {
                    info!(target: CONTAINER_LOG_TARGET, "{}: {}", name, line);
                }
            }
        });

        Ok(())
    }

    fn start_reaper(&mut self, label: (&str, &str)) -> Result<()> {
        if self.reaper.is_some() {
            return Ok(());
        }

        let docker = &self.docker;
        let (id, port) = self.block_on(async {
            ensure_image(docker, REAPER_IMAGE).await?;

            let mut labels = HashMap::new();
            labels.insert(LABEL_REAPER.to_string(), "true".to_string());
            let mut exposed_ports = HashMap::new();
            exposed_ports.insert(port_key(REAPER_PORT), HashMap::new());

            let config = Config {
                image: Some(REAPER_IMAGE.to_string()),
                labels: Some(labels),
                exposed_ports: Some(exposed_ports),
                host_config: Some(HostConfig {
                    publish_all_ports: Some(true),
                    auto_remove: Some(true),
                    binds: Some(vec![format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET)]),
                    ..Default::default()
                }),
                ..Default::default()
            };

            let id = docker
                .create_container(None::<CreateContainerOptions<String>>, config)
                .await?
                .id;
            docker
                .start_container(&id, None::<StartContainerOptions<String>>)
                .await?;
            wait_running(docker, &id).await?;

            let port = host_port(docker, &id, REAPER_PORT).await?;
            Ok::<_, anyhow::Error>((id, port))
        })?;

        let stream = self.block_on(async {
            let started = Instant::now();
            loop {
                match TcpStream::connect((self.host.as_str(), port)).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) if started.elapsed() > START_TIMEOUT => {
                        return Err(anyhow!(err).context("could not reach the reaper"))
                    }
                    Err(_) => sleep(POLL_INTERVAL).await,
                }
            }
        })?;
        let mut stream = stream.into_std()?;
        stream.set_nonblocking(false)?;

        writeln!(stream, "label={}={}", label.0, label.1)?;
        let mut ack = String::new();
        BufReader::new(&stream).read_line(&mut ack)?;
        if ack.trim() != "ACK" {
            bail!("reaper {} answered {:?} instead of ACK", id, ack.trim());
        }

        info!(
            "reaper {} removes everything labelled {}={}",
            &id[..12.min(id.len())],
            label.0,
            label.1
        );
        self.reaper = Some(stream);
        Ok(())
    }

    fn docker_host(&mut self) -> Result<String> {
        Ok(self.host.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn docker_host_defaults_to_localhost() {
        assert_eq!(docker_host_from_env(None), "localhost");
        assert_eq!(docker_host_from_env(Some("unix:///var/run/docker.sock")), "localhost");
        assert_eq!(docker_host_from_env(Some("tcp://10.0.0.5:2375")), "10.0.0.5");
    }

    #[test]
    fn single_file_archive() {
        let archive = tar_single_file("/ct_start.sh", b"#!/bin/sh\n", 0o755).unwrap();
        let mut archive = tar::Archive::new(archive.as_slice());

        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("ct_start.sh"));
        assert_eq!(entry.header().mode().unwrap(), 0o755);

        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "#!/bin/sh\n");
        assert!(entries.next().is_none());
    }
}
