//! Topic creation once the broker cluster is ready.

use anyhow::bail;
use log::{debug, info};

use crate::{
    config::{Config, SaslCredentials},
    error::{Error, Result},
    models::ContainerId,
    plan::BROKER_INTERNAL_PORT,
    services::ContainerBackend,
};

/// Topics of an ephemeral cluster always get this replication factor,
/// whatever the cluster size.
pub const BOOTSTRAP_REPLICATION_FACTOR: u32 = 1;

const ADMIN_PROPERTIES: &str = "/tmp/ct-admin.properties";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
}

pub fn topic_specs(config: &Config) -> Vec<TopicSpec> {
    config
        .kafka
        .topics
        .iter()
        .map(|name| TopicSpec {
            name: name.clone(),
            partitions: config.kafka.partition_count,
            replication_factor: BOOTSTRAP_REPLICATION_FACTOR,
        })
        .collect()
}

/// Creates a batch of topics; either all of them exist afterwards or the
/// call fails.
pub trait TopicAdmin {
    fn create_topics(&mut self, topics: &[TopicSpec]) -> anyhow::Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BrokerFlavour {
    Kafka,
    Redpanda,
}

/// Runs the broker's own admin tooling inside the broker container.
pub struct ExecTopicAdmin<'a> {
    backend: &'a mut dyn ContainerBackend,
    broker: ContainerId,
    flavour: BrokerFlavour,
    sasl: Option<SaslCredentials>,
}

impl<'a> ExecTopicAdmin<'a> {
    pub fn new(
        backend: &'a mut dyn ContainerBackend,
        broker: ContainerId,
        config: &Config,
    ) -> ExecTopicAdmin<'a> {
        let flavour = if config.redpanda.enabled {
            BrokerFlavour::Redpanda
        } else {
            BrokerFlavour::Kafka
        };

        ExecTopicAdmin {
            backend,
            broker,
            flavour,
            sasl: config.kafka.sasl(),
        }
    }

    /// The single shell invocation creating every topic.
    pub fn command(&self, topics: &[TopicSpec]) -> Vec<String> {
        let script = match self.flavour {
            BrokerFlavour::Redpanda => redpanda_script(topics),
            BrokerFlavour::Kafka => kafka_script(topics, &self.sasl),
        };

        vec!["sh".into(), "-c".into(), script]
    }
}

impl<'a> TopicAdmin for ExecTopicAdmin<'a> {
    fn create_topics(&mut self, topics: &[TopicSpec]) -> anyhow::Result<()> {
        let command = self.command(topics);
        debug!("running {:?} in {}", command, self.broker.0);

        let output = self.backend.exec(&self.broker, &command)?;
        if !output.success() {
            bail!(
                "topic creation exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn kafka_script(topics: &[TopicSpec], sasl: &Option<SaslCredentials>) -> String {
    let mut steps = Vec::new();
    let mut client_config = String::new();

    if let Some(credentials) = sasl {
        steps.push(format!(
            "printf '%s\\n' {} {} {} > {}",
            shell_quote("security.protocol=SASL_PLAINTEXT"),
            shell_quote("sasl.mechanism=PLAIN"),
            shell_quote(&format!("sasl.jaas.config={}", credentials.jaas_config())),
            ADMIN_PROPERTIES
        ));
        client_config = format!(" --command-config {}", ADMIN_PROPERTIES);
    }

    for topic in topics {
        steps.push(format!(
            "kafka-topics --bootstrap-server localhost:{}{} --create --topic {} --partitions {} --replication-factor {}",
            BROKER_INTERNAL_PORT,
            client_config,
            shell_quote(&topic.name),
            topic.partitions,
            topic.replication_factor
        ));
    }

    steps.join(" && ")
}

fn redpanda_script(topics: &[TopicSpec]) -> String {
    // All topics share the configured partition count.
    let names = topics
        .iter()
        .map(|topic| shell_quote(&topic.name))
        .collect::<Vec<_>>()
        .join(" ");
    let (partitions, replication_factor) = topics
        .first()
        .map(|topic| (topic.partitions, topic.replication_factor))
        .unwrap_or((1, BOOTSTRAP_REPLICATION_FACTOR));

    format!(
        "rpk topic create {} -p {} -r {}",
        names, partitions, replication_factor
    )
}

/// Submits every configured topic as one batch.
pub fn create_topics(admin: &mut dyn TopicAdmin, config: &Config) -> Result<()> {
    let topics = topic_specs(config);
    if topics.is_empty() {
        return Ok(());
    }

    let names = topics.iter().map(|topic| topic.name.clone()).collect::<Vec<_>>();
    info!("creating topics {:?}", names);

    admin
        .create_topics(&topics)
        .map_err(|source| Error::Bootstrap {
            topics: names,
            source,
        })
}
