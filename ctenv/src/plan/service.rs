use super::{Context, Resource};
use crate::{
    config::{AdditionalContainer, Config},
    hasher,
    identity::{LABEL_ADDITIONAL, LABEL_HASH, LABEL_MAIN},
    models::{ContainerSpec, Readiness},
};

fn instance_name(config: &Config, index: u32) -> String {
    format!("{}-{}", config.service.name, index)
}

pub(crate) fn containers(context: &Context) -> Vec<ContainerSpec> {
    let config = context.config;

    let instances = (1..=config.service.instance_count).map(|index| instance(context, index));
    let additional = config
        .additional_containers
        .iter()
        .map(|container| additional(context, container));

    instances.chain(additional).collect()
}

fn instance(context: &Context, index: u32) -> ContainerSpec {
    let config = context.config;
    let service = &config.service;
    let debug_port = service.debug_port.saturating_add((index - 1) as u16);

    let readiness = match &service.log_message {
        Some(pattern) => Readiness::LogMessage {
            pattern: pattern.clone(),
            times: 1,
        },
        None => Readiness::Http {
            port: service.port,
            path: service.health_endpoint.clone(),
            status: 200,
        },
    };

    let mut spec = context
        .container(
            &instance_name(config, index),
            format!("{}:{}", service.name, service.image_tag),
        )
        .port(service.port)
        .port(debug_port)
        .env(
            "JAVA_TOOL_OPTIONS",
            format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=*:{}",
                debug_port
            ),
        )
        .envs(&service.env)
        .readiness(readiness, service.startup_timeout)
        .logging(service.container_logging_enabled);

    for (host_path, container_path) in &service.binds {
        spec = spec.bind(host_path, container_path);
    }

    if index == 1 {
        spec = spec
            .label(LABEL_MAIN, context.identity.main_label.clone())
            .label(LABEL_HASH, hasher::fingerprint(config));
    }

    spec
}

fn additional(context: &Context, container: &AdditionalContainer) -> ContainerSpec {
    context
        .container(
            &container.name,
            format!("{}:{}", container.name, container.image_tag),
        )
        .port(container.port)
        .port(container.debug_port)
        .label(LABEL_ADDITIONAL, container.name.clone())
        .readiness(
            Readiness::ListeningPort {
                port: container.port,
            },
            context.config.service.startup_timeout,
        )
        .logging(container.container_logging_enabled)
}

/// Instances after the first; the first is found through its main label.
pub(crate) fn resources(config: &Config) -> Vec<Resource> {
    (2..=config.service.instance_count)
        .map(|index| Resource::new(instance_name(config, index), config.service.port, true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RunIdentity;

    fn specs(pairs: &[(&str, &str)]) -> Vec<ContainerSpec> {
        let config = Config::from_pairs(pairs).unwrap();
        let identity = RunIdentity::new(&config.container);
        containers(&Context {
            config: &config,
            identity: &identity,
        })
    }

    #[test]
    fn instances_differ_in_name_and_debug_port() {
        let specs = specs(&[
            ("service.name", "orders"),
            ("service.image.tag", "1.4.0"),
            ("service.instance.count", "2"),
            ("service.envvars", "SPRING_PROFILES_ACTIVE=it"),
            ("service.additional.filesystem.binds", "/tmp/config=/config"),
        ]);

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name.0, "ct-orders-1");
        assert_eq!(specs[1].name.0, "ct-orders-2");
        assert_eq!(specs[0].image, "orders:1.4.0");
        assert_eq!(specs[0].ports, vec![8080, 5001]);
        assert_eq!(specs[1].ports, vec![8080, 5002]);
        assert_eq!(specs[1].env["SPRING_PROFILES_ACTIVE"], "it");
        assert_eq!(specs[1].binds, vec!["/tmp/config:/config"]);
        assert!(specs[0].labels.contains_key(LABEL_HASH));
        assert!(!specs[1].labels.contains_key(LABEL_MAIN));
    }

    #[test]
    fn log_message_replaces_health_check() {
        let logged = specs(&[("service.startup.log.message", "Started .* in")]);
        assert_eq!(
            logged[0].readiness,
            Readiness::LogMessage {
                pattern: "Started .* in".into(),
                times: 1,
            }
        );

        let checked = specs(&[]);
        assert_eq!(
            checked[0].readiness,
            Readiness::Http {
                port: 8080,
                path: "/actuator/health".into(),
                status: 200,
            }
        );
    }

    #[test]
    fn additional_containers_follow_instances() {
        let specs = specs(&[(
            "additional.containers",
            "simulator,8085,5005,2.1,true",
        )]);

        let simulator = &specs[1];
        assert_eq!(simulator.name.0, "ct-simulator");
        assert_eq!(simulator.image, "simulator:2.1");
        assert_eq!(simulator.labels[LABEL_ADDITIONAL], "simulator");
        assert_eq!(simulator.readiness, Readiness::ListeningPort { port: 8085 });
        assert!(simulator.logging);
    }
}
