use std::cmp::min;

use super::{Context, Resource, DEFAULT_STARTUP_TIMEOUT, SLOW_STARTUP_TIMEOUT};
use crate::{
    config::{Config, SaslCredentials},
    models::{ContainerSpec, Readiness, StartupScript},
};

/// Listener every broker exposes on the private network.
pub const BROKER_INTERNAL_PORT: u16 = 9092;
const CONTROLLER_PORT: u16 = 9094;
const ZOOKEEPER_PORT: u16 = 2181;
const CLUSTER_ID: &str = "MkU3OEVBNTcwNTJENDM2Qk";
const STARTUP_SCRIPT_PATH: &str = "/ct_start.sh";

const KAFKA_STARTED: &str = r"(\[KafkaServer id=\d+\] started|Kafka Server started)";
const REDPANDA_STARTED: &str = "Successfully started Redpanda!";

const SCHEMA_REGISTRY: &str = "kafka-schema-registry";
const CONTROL_CENTER: &str = "kafka-control-center";
const CONDUKTOR: &str = "conduktor";
const GATEWAY: &str = "conduktor-gateway";
const DEBEZIUM: &str = "debezium";

/// `kafka`, `kafka-2`, `kafka-3`, ...
fn broker_name(index: u32) -> String {
    match index {
        1 => "kafka".to_string(),
        _ => format!("kafka-{}", index),
    }
}

fn broker_names(count: u32) -> Vec<String> {
    (1..=count).map(broker_name).collect()
}

/// Internal bootstrap address list of whichever broker is enabled.
pub fn bootstrap_servers(config: &Config) -> String {
    if config.redpanda.enabled {
        return format!("redpanda:{}", BROKER_INTERNAL_PORT);
    }

    broker_names(config.kafka.broker_count)
        .iter()
        .map(|name| format!("{}:{}", name, BROKER_INTERNAL_PORT))
        .collect::<Vec<_>>()
        .join(",")
}

fn security_protocol(sasl: &Option<SaslCredentials>) -> &'static str {
    match sasl {
        Some(_) => "SASL_PLAINTEXT",
        None => "PLAINTEXT",
    }
}

/// Client-side SASL settings under an image specific environment prefix.
fn client_security(
    spec: ContainerSpec,
    prefix: &str,
    sasl: &Option<SaslCredentials>,
) -> ContainerSpec {
    match sasl {
        Some(credentials) => spec
            .env(format!("{}SECURITY_PROTOCOL", prefix), "SASL_PLAINTEXT")
            .env(format!("{}SASL_MECHANISM", prefix), "PLAIN")
            .env(format!("{}SASL_JAAS_CONFIG", prefix), credentials.jaas_config()),
        None => spec,
    }
}

pub(crate) fn brokers(context: &Context) -> Vec<ContainerSpec> {
    let config = context.config;

    if config.redpanda.enabled {
        return vec![redpanda(context)];
    }
    if !config.kafka.broker.enabled {
        return Vec::new();
    }

    let count = config.kafka.broker_count;
    let mut containers = Vec::new();
    if count > 1 {
        containers.push(zookeeper(context));
    }
    containers.extend((1..=count).map(|index| kafka_broker(context, index)));
    containers
}

fn zookeeper(context: &Context) -> ContainerSpec {
    let kafka = &context.config.kafka.broker;

    context
        .container(
            "zookeeper",
            format!("confluentinc/cp-zookeeper:{}", kafka.image_tag),
        )
        .env("ZOOKEEPER_CLIENT_PORT", ZOOKEEPER_PORT)
        .env("ZOOKEEPER_TICK_TIME", 2000)
        .readiness(
            Readiness::LogMessage {
                pattern: "binding to port".into(),
                times: 1,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
        .logging(kafka.container_logging_enabled)
}

fn kafka_broker(context: &Context, index: u32) -> ContainerSpec {
    let kafka = &context.config.kafka;
    let count = kafka.broker_count;
    let sasl = kafka.sasl();
    let name = broker_name(index);
    let internal_replication = min(count, 3);

    let mut protocol_map = format!(
        "INTERNAL:{protocol},EXTERNAL:{protocol}",
        protocol = security_protocol(&sasl)
    );
    let mut listeners = format!(
        "INTERNAL://0.0.0.0:{},EXTERNAL://0.0.0.0:{}",
        BROKER_INTERNAL_PORT, kafka.broker.port
    );

    let mut spec = context
        .dependency(&name, "confluentinc/cp-kafka", &kafka.broker)
        .env("KAFKA_INTER_BROKER_LISTENER_NAME", "INTERNAL")
        .env("KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR", internal_replication)
        .env("KAFKA_TRANSACTION_STATE_LOG_REPLICATION_FACTOR", internal_replication)
        .env("KAFKA_TRANSACTION_STATE_LOG_MIN_ISR", 1)
        .env("KAFKA_DEFAULT_REPLICATION_FACTOR", kafka.replication_factor)
        .env("KAFKA_MIN_INSYNC_REPLICAS", kafka.min_insync_replicas)
        .env("KAFKA_NUM_PARTITIONS", kafka.partition_count)
        .env("KAFKA_GROUP_INITIAL_REBALANCE_DELAY_MS", 0);

    if count == 1 {
        protocol_map.push_str(",CONTROLLER:PLAINTEXT");
        listeners.push_str(&format!(",CONTROLLER://0.0.0.0:{}", CONTROLLER_PORT));
        spec = spec
            .env("KAFKA_NODE_ID", index)
            .env("KAFKA_PROCESS_ROLES", "broker,controller")
            .env("KAFKA_CONTROLLER_LISTENER_NAMES", "CONTROLLER")
            .env(
                "KAFKA_CONTROLLER_QUORUM_VOTERS",
                format!("{}@{}:{}", index, name, CONTROLLER_PORT),
            )
            .env("CLUSTER_ID", CLUSTER_ID);
    } else {
        spec = spec
            .env("KAFKA_BROKER_ID", index)
            .env(
                "KAFKA_ZOOKEEPER_CONNECT",
                format!("zookeeper:{}", ZOOKEEPER_PORT),
            );
    }

    if let Some(credentials) = &sasl {
        let jaas = format!(
            "org.apache.kafka.common.security.plain.PlainLoginModule required username=\"{user}\" password=\"{pass}\" user_{user}=\"{pass}\";",
            user = credentials.username,
            pass = credentials.password
        );
        spec = spec
            .env("KAFKA_SASL_ENABLED_MECHANISMS", "PLAIN")
            .env("KAFKA_SASL_MECHANISM_INTER_BROKER_PROTOCOL", "PLAIN")
            .env("KAFKA_LISTENER_NAME_INTERNAL_PLAIN_SASL_JAAS_CONFIG", jaas.clone())
            .env("KAFKA_LISTENER_NAME_EXTERNAL_PLAIN_SASL_JAAS_CONFIG", jaas);
    }

    let script = StartupScript {
        path: STARTUP_SCRIPT_PATH.into(),
        port: kafka.broker.port,
        template: format!(
            "#!/bin/bash\nexport KAFKA_ADVERTISED_LISTENERS=INTERNAL://{}:{},EXTERNAL://%HOST%:%PORT%\nexec /etc/confluent/docker/run\n",
            name, BROKER_INTERNAL_PORT
        ),
    };

    spec.env("KAFKA_LISTENER_SECURITY_PROTOCOL_MAP", protocol_map)
        .env("KAFKA_LISTENERS", listeners)
        .startup_script(script)
        .readiness(
            Readiness::LogMessage {
                pattern: KAFKA_STARTED.into(),
                times: 1,
            },
            SLOW_STARTUP_TIMEOUT,
        )
}

fn redpanda(context: &Context) -> ContainerSpec {
    let redpanda = &context.config.redpanda;

    let script = StartupScript {
        path: STARTUP_SCRIPT_PATH.into(),
        port: redpanda.port,
        template: format!(
            "#!/bin/sh\nexec /usr/bin/rpk redpanda start --mode dev-container --smp 1 \
             --kafka-addr INTERNAL://0.0.0.0:{internal},EXTERNAL://0.0.0.0:{external} \
             --advertise-kafka-addr INTERNAL://redpanda:{internal},EXTERNAL://%HOST%:%PORT%\n",
            internal = BROKER_INTERNAL_PORT,
            external = redpanda.port
        ),
    };

    context
        .dependency("redpanda", "redpandadata/redpanda", redpanda)
        .startup_script(script)
        .readiness(
            Readiness::LogMessage {
                pattern: REDPANDA_STARTED.into(),
                times: 1,
            },
            SLOW_STARTUP_TIMEOUT,
        )
}

pub(crate) fn dependents(context: &Context) -> Vec<ContainerSpec> {
    let config = context.config;
    let mut containers = Vec::new();

    if config.schema_registry.enabled {
        containers.push(schema_registry(context));
    }
    if config.control_center.enabled {
        containers.push(control_center(context));
    }
    if config.debezium.enabled {
        containers.push(debezium(context));
    }
    if config.conduktor.console.enabled {
        containers.push(conduktor(context));
    }
    if config.conduktor_gateway.gateway.enabled {
        containers.push(gateway(context));
    }

    containers
}

fn schema_registry(context: &Context) -> ContainerSpec {
    let config = context.config;
    let registry = &config.schema_registry;
    let sasl = config.kafka.sasl();
    let protocol = security_protocol(&sasl);

    let servers = bootstrap_servers(config)
        .split(',')
        .map(|server| format!("{}://{}", protocol, server))
        .collect::<Vec<_>>()
        .join(",");

    let spec = context
        .dependency(SCHEMA_REGISTRY, "confluentinc/cp-schema-registry", registry)
        .env("SCHEMA_REGISTRY_HOST_NAME", SCHEMA_REGISTRY)
        .env(
            "SCHEMA_REGISTRY_LISTENERS",
            format!("http://0.0.0.0:{}", registry.port),
        )
        .env("SCHEMA_REGISTRY_KAFKASTORE_BOOTSTRAP_SERVERS", servers)
        .readiness(
            Readiness::Http {
                port: registry.port,
                path: "/subjects".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        );

    client_security(spec, "SCHEMA_REGISTRY_KAFKASTORE_", &sasl)
}

fn control_center(context: &Context) -> ContainerSpec {
    let config = context.config;
    let center = &config.control_center;

    let mut spec = context
        .dependency(
            CONTROL_CENTER,
            "confluentinc/cp-enterprise-control-center",
            center,
        )
        .env("CONTROL_CENTER_BOOTSTRAP_SERVERS", bootstrap_servers(config))
        .env(
            "CONTROL_CENTER_REST_LISTENERS",
            format!("http://0.0.0.0:{}", center.port),
        )
        .env("CONTROL_CENTER_REPLICATION_FACTOR", config.kafka.replication_factor)
        .env("CONTROL_CENTER_INTERNAL_TOPICS_PARTITIONS", 1)
        .env("CONTROL_CENTER_MONITORING_INTERCEPTOR_TOPIC_PARTITIONS", 1)
        .env("CONFLUENT_METRICS_TOPIC_REPLICATION", config.kafka.replication_factor)
        .readiness(
            Readiness::Http {
                port: center.port,
                path: "/".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        );

    if config.schema_registry.enabled {
        spec = spec.env(
            "CONTROL_CENTER_SCHEMA_REGISTRY_URL",
            format!("http://{}:{}", SCHEMA_REGISTRY, config.schema_registry.port),
        );
    }

    client_security(spec, "CONTROL_CENTER_STREAMS_", &config.kafka.sasl())
}

fn debezium(context: &Context) -> ContainerSpec {
    let config = context.config;
    let debezium = &config.debezium;
    let sasl = config.kafka.sasl();
    let replication = config.kafka.replication_factor;

    let spec = context
        .dependency(DEBEZIUM, "debezium/connect", debezium)
        .env("BOOTSTRAP_SERVERS", bootstrap_servers(config))
        .env("REST_PORT", debezium.port)
        .env("GROUP_ID", "ct-debezium")
        .env("CONFIG_STORAGE_TOPIC", "ct_connect_configs")
        .env("OFFSET_STORAGE_TOPIC", "ct_connect_offsets")
        .env("STATUS_STORAGE_TOPIC", "ct_connect_statuses")
        .env("CONFIG_STORAGE_REPLICATION_FACTOR", replication)
        .env("OFFSET_STORAGE_REPLICATION_FACTOR", replication)
        .env("STATUS_STORAGE_REPLICATION_FACTOR", replication)
        .readiness(
            Readiness::Http {
                port: debezium.port,
                path: "/connectors".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        );

    let spec = client_security(spec, "CONNECT_", &sasl);
    let spec = client_security(spec, "CONNECT_PRODUCER_", &sasl);
    client_security(spec, "CONNECT_CONSUMER_", &sasl)
}

fn conduktor(context: &Context) -> ContainerSpec {
    let config = context.config;
    let console = &config.conduktor.console;

    let mut spec = context
        .dependency(CONDUKTOR, "conduktor/conduktor-console", console)
        .env("CDK_LISTENING_PORT", console.port)
        .env("CDK_ORGANIZATION_NAME", "ctenv")
        .env("CDK_ADMIN_EMAIL", "admin@ctenv.io")
        .env("CDK_ADMIN_PASSWORD", "admin")
        .env("CDK_CLUSTERS_0_ID", "ct")
        .env("CDK_CLUSTERS_0_NAME", "ct")
        .env("CDK_CLUSTERS_0_BOOTSTRAPSERVERS", bootstrap_servers(config))
        .readiness(
            Readiness::Http {
                port: console.port,
                path: "/api/health/live".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        );

    if let Some(credentials) = config.kafka.sasl() {
        spec = spec.env(
            "CDK_CLUSTERS_0_PROPERTIES",
            format!(
                "security.protocol=SASL_PLAINTEXT\nsasl.mechanism=PLAIN\nsasl.jaas.config={}",
                credentials.jaas_config()
            ),
        );
    }
    if config.schema_registry.enabled {
        spec = spec.env(
            "CDK_CLUSTERS_0_SCHEMAREGISTRY_URL",
            format!("http://{}:{}", SCHEMA_REGISTRY, config.schema_registry.port),
        );
    }
    if config.postgres.database.enabled {
        let postgres = &config.postgres;
        spec = spec.env(
            "CDK_DATABASE_URL",
            format!(
                "postgresql://{}:{}@postgres:{}/{}",
                postgres.username, postgres.password, postgres.database.port, postgres.database_name
            ),
        );
    }
    if !config.conduktor.license_key.is_empty() {
        spec = spec.env("CDK_LICENSE", config.conduktor.license_key.clone());
    }

    spec
}

fn gateway(context: &Context) -> ContainerSpec {
    let config = context.config;
    let gateway = &config.conduktor_gateway;

    let spec = context
        .dependency(GATEWAY, "conduktor/conduktor-gateway", &gateway.gateway)
        .port(gateway.proxy_port)
        .env("KAFKA_BOOTSTRAP_SERVERS", bootstrap_servers(config))
        .env("GATEWAY_HTTP_PORT", gateway.gateway.port)
        .env("GATEWAY_PORT_START", gateway.proxy_port)
        .env("GATEWAY_ADVERTISED_HOST", GATEWAY)
        .readiness(
            Readiness::Http {
                port: gateway.gateway.port,
                path: "/health".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        );

    client_security(spec, "KAFKA_", &config.kafka.sasl())
}

pub(crate) fn resources(config: &Config) -> Vec<Resource> {
    let kafka = &config.kafka;
    let mut resources = Vec::new();

    if kafka.broker.enabled {
        resources.extend(
            broker_names(kafka.broker_count)
                .into_iter()
                .map(|name| Resource::new(name, kafka.broker.port, true)),
        );
    } else {
        resources.push(Resource::new("kafka", kafka.broker.port, false));
    }

    resources.push(Resource::new(
        "redpanda",
        config.redpanda.port,
        config.redpanda.enabled,
    ));
    resources.push(Resource::new(
        SCHEMA_REGISTRY,
        config.schema_registry.port,
        config.schema_registry.enabled,
    ));
    resources.push(Resource::new(
        CONTROL_CENTER,
        config.control_center.port,
        config.control_center.enabled,
    ));
    resources.push(Resource::new(
        DEBEZIUM,
        config.debezium.port,
        config.debezium.enabled,
    ));
    resources.push(Resource::new(
        CONDUKTOR,
        config.conduktor.console.port,
        config.conduktor.console.enabled,
    ));

    let gateway = &config.conduktor_gateway;
    resources.push(Resource::new(
        GATEWAY,
        gateway.gateway.port,
        gateway.gateway.enabled,
    ));
    resources.push(Resource {
        key: format!("{}-proxy", GATEWAY),
        container: GATEWAY.to_string(),
        port: gateway.proxy_port,
        enabled: gateway.gateway.enabled,
    });

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RunIdentity;

    fn specs(pairs: &[(&str, &str)]) -> (Vec<ContainerSpec>, Vec<ContainerSpec>) {
        let config = Config::from_pairs(pairs).unwrap();
        let identity = RunIdentity::new(&config.container);
        let context = Context {
            config: &config,
            identity: &identity,
        };
        (brokers(&context), dependents(&context))
    }

    #[test]
    fn single_broker_runs_kraft() {
        let (brokers, _) = specs(&[("kafka.enabled", "true")]);

        assert_eq!(brokers.len(), 1);
        let kafka = &brokers[0];
        assert_eq!(kafka.name.0, "ct-kafka");
        assert_eq!(kafka.alias, "kafka");
        assert_eq!(kafka.ports, vec![9093]);
        assert_eq!(kafka.env["KAFKA_PROCESS_ROLES"], "broker,controller");
        assert_eq!(kafka.env["KAFKA_CONTROLLER_QUORUM_VOTERS"], "1@kafka:9094");
        assert!(!kafka.env.contains_key("KAFKA_ZOOKEEPER_CONNECT"));

        let script = kafka.startup_script.as_ref().unwrap();
        assert_eq!(script.port, 9093);
        assert!(script
            .render("localhost", 32800)
            .contains("INTERNAL://kafka:9092,EXTERNAL://localhost:32800"));
        assert_eq!(kafka.command, Some(vec![script.wait_command()]));
    }

    #[test]
    fn several_brokers_share_a_zookeeper() {
        let (brokers, _) = specs(&[
            ("kafka.enabled", "true"),
            ("kafka.broker.count", "3"),
            ("kafka.topic.replication.factor", "3"),
            ("kafka.min.insync.replicas", "2"),
        ]);

        let names = brokers.iter().map(|spec| spec.name.0.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["ct-zookeeper", "ct-kafka", "ct-kafka-2", "ct-kafka-3"]);
        assert_eq!(brokers[3].env["KAFKA_BROKER_ID"], "3");
        assert_eq!(brokers[3].env["KAFKA_ZOOKEEPER_CONNECT"], "zookeeper:2181");
        assert_eq!(brokers[1].env["KAFKA_MIN_INSYNC_REPLICAS"], "2");
    }

    #[test]
    fn sasl_reaches_broker_and_clients() {
        let (brokers, dependents) = specs(&[
            ("kafka.enabled", "true"),
            ("kafka.sasl.plain.enabled", "true"),
            ("kafka.schema.registry.enabled", "true"),
        ]);

        assert_eq!(
            brokers[0].env["KAFKA_LISTENER_SECURITY_PROTOCOL_MAP"],
            "INTERNAL:SASL_PLAINTEXT,EXTERNAL:SASL_PLAINTEXT,CONTROLLER:PLAINTEXT"
        );
        assert!(brokers[0].env["KAFKA_LISTENER_NAME_INTERNAL_PLAIN_SASL_JAAS_CONFIG"]
            .contains("user_demo=\"demo-password\""));

        let registry = &dependents[0];
        assert_eq!(
            registry.env["SCHEMA_REGISTRY_KAFKASTORE_BOOTSTRAP_SERVERS"],
            "SASL_PLAINTEXT://kafka:9092"
        );
        assert_eq!(
            registry.env["SCHEMA_REGISTRY_KAFKASTORE_SASL_MECHANISM"],
            "PLAIN"
        );
    }

    #[test]
    fn dependents_point_at_redpanda() {
        let (brokers, dependents) = specs(&[
            ("redpanda.enabled", "true"),
            ("debezium.enabled", "true"),
        ]);

        assert_eq!(brokers.len(), 1);
        assert_eq!(brokers[0].name.0, "ct-redpanda");
        assert_eq!(dependents[0].env["BOOTSTRAP_SERVERS"], "redpanda:9092");
    }

    #[test]
    fn bootstrap_servers_list_every_broker() {
        let config = Config::from_pairs(&[("kafka.enabled", "true"), ("kafka.broker.count", "2")])
            .unwrap();
        assert_eq!(bootstrap_servers(&config), "kafka:9092,kafka-2:9092");
    }
}
