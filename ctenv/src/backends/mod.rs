mod docker;

pub use docker::{docker_host_from_env, DockerBackend, CONTAINER_LOG_TARGET};
