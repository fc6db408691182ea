//! The typed, validated configuration snapshot for one run.

use regex::Regex;
use std::{collections::BTreeMap as Map, time::Duration};

use crate::error::ConfigError;

pub mod grammar;
pub mod keys;
mod loader;
mod settings;

pub use loader::{environment_overrides, ConfigLoader, ConfigSource, LoadedConfig, CONFIG_FILE_KEY};
pub use settings::Settings;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Config {
    pub container: ContainerConfig,
    pub service: ServiceConfig,
    pub additional_containers: Vec<AdditionalContainer>,
    pub kafka: KafkaConfig,
    pub redpanda: DependencyConfig,
    pub schema_registry: DependencyConfig,
    pub control_center: DependencyConfig,
    pub conduktor: ConduktorConfig,
    pub conduktor_gateway: GatewayConfig,
    pub debezium: DependencyConfig,
    pub postgres: DatabaseConfig,
    pub mariadb: DatabaseConfig,
    pub mongodb: DependencyConfig,
    pub wiremock: DependencyConfig,
    pub localstack: LocalstackConfig,
    pub elasticsearch: DependencyConfig,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ContainerConfig {
    pub name_prefix: String,
    pub main_label: String,
    pub append_group_id: bool,
    pub stay_up: bool,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub instance_count: u32,
    pub image_tag: String,
    pub port: u16,
    pub debug_port: u16,
    pub env: Map<String, String>,
    pub binds: Map<String, String>,
    pub health_endpoint: String,
    pub log_message: Option<String>,
    pub startup_timeout: Duration,
    pub container_logging_enabled: bool,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdditionalContainer {
    pub name: String,
    pub port: u16,
    pub debug_port: u16,
    pub image_tag: String,
    pub container_logging_enabled: bool,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DependencyConfig {
    pub enabled: bool,
    pub image_tag: String,
    pub port: u16,
    pub container_logging_enabled: bool,
}

impl DependencyConfig {
    fn read(
        settings: &Settings,
        section: &str,
        image_tag: &str,
        port: u16,
    ) -> Result<DependencyConfig, ConfigError> {
        let key = |suffix: &str| format!("{}.{}", section, suffix);

        Ok(DependencyConfig {
            enabled: settings.bool(&key("enabled"), false)?,
            image_tag: settings.string(&key("image.tag"), image_tag),
            port: settings.number(&key("port"), port)?,
            container_logging_enabled: settings.bool(&key("container.logging.enabled"), false)?,
        })
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KafkaConfig {
    pub broker: DependencyConfig,
    pub broker_count: u32,
    pub topics: Vec<String>,
    pub partition_count: u32,
    pub replication_factor: u32,
    pub min_insync_replicas: u32,
    pub sasl_plain_enabled: bool,
    pub sasl_plain_username: String,
    pub sasl_plain_password: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl SaslCredentials {
    pub fn jaas_config(&self) -> String {
        format!(
            "org.apache.kafka.common.security.plain.PlainLoginModule required username=\"{user}\" password=\"{pass}\";",
            user = self.username,
            pass = self.password
        )
    }
}

impl KafkaConfig {
    pub fn sasl(&self) -> Option<SaslCredentials> {
        if self.sasl_plain_enabled {
            Some(SaslCredentials {
                username: self.sasl_plain_username.clone(),
                password: self.sasl_plain_password.clone(),
            })
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ConduktorConfig {
    pub console: DependencyConfig,
    pub license_key: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct GatewayConfig {
    pub gateway: DependencyConfig,
    pub proxy_port: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database: DependencyConfig,
    pub database_name: String,
    pub username: String,
    pub password: String,
}

impl DatabaseConfig {
    fn read(
        settings: &Settings,
        section: &str,
        image_tag: &str,
        port: u16,
    ) -> Result<DatabaseConfig, ConfigError> {
        Ok(DatabaseConfig {
            database: DependencyConfig::read(settings, section, image_tag, port)?,
            database_name: settings.string(&format!("{}.database.name", section), "ct-db"),
            username: settings.string(&format!("{}.username", section), "user"),
            password: settings.string(&format!("{}.password", section), "password"),
        })
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct LocalstackConfig {
    pub localstack: DependencyConfig,
    pub services: Vec<String>,
}

impl Config {
    pub fn from_settings(settings: &Settings) -> Result<Config, ConfigError> {
        let log_message = settings.string("service.startup.log.message", "");
        if !log_message.is_empty() {
            Regex::new(&log_message).map_err(|err| {
                ConfigError::invalid("service.startup.log.message", log_message.as_str(), err)
            })?;
        }

        Ok(Config {
            container: ContainerConfig {
                name_prefix: settings.string("container.name.prefix", "ct"),
                main_label: settings.string("container.main.label", "main-container"),
                append_group_id: settings.bool("container.append.group.id", false)?,
                stay_up: settings.bool("container.stay.up", false)?,
            },
            service: ServiceConfig {
                name: settings.string("service.name", "app"),
                instance_count: settings.number("service.instance.count", 1)?,
                image_tag: settings.string("service.image.tag", "latest"),
                port: settings.number("service.port", 8080)?,
                debug_port: settings.number("service.debug.port", 5001)?,
                env: grammar::parse_pairs(
                    "service.envvars",
                    &settings.string("service.envvars", ""),
                )?,
                binds: grammar::parse_pairs(
                    "service.additional.filesystem.binds",
                    &settings.string("service.additional.filesystem.binds", ""),
                )?,
                health_endpoint: settings
                    .string("service.startup.health.endpoint", "/actuator/health"),
                log_message: if log_message.is_empty() {
                    None
                } else {
                    Some(log_message)
                },
                startup_timeout: settings.seconds("service.startup.timeout.seconds", 180)?,
                container_logging_enabled: settings
                    .bool("service.container.logging.enabled", false)?,
            },
            additional_containers: grammar::parse_additional_containers(
                "additional.containers",
                &settings.string("additional.containers", ""),
            )?,
            kafka: KafkaConfig {
                broker: DependencyConfig::read(settings, "kafka", "7.7.1", 9093)?,
                broker_count: settings.number("kafka.broker.count", 1)?,
                topics: grammar::parse_list(&settings.string("kafka.topics", "")),
                partition_count: settings.number("kafka.topic.partition.count", 5)?,
                replication_factor: settings.number("kafka.topic.replication.factor", 1)?,
                min_insync_replicas: settings.number("kafka.min.insync.replicas", 1)?,
                sasl_plain_enabled: settings.bool("kafka.sasl.plain.enabled", false)?,
                sasl_plain_username: settings.string("kafka.sasl.plain.username", "demo"),
                sasl_plain_password: settings.string("kafka.sasl.plain.password", "demo-password"),
            },
            redpanda: DependencyConfig::read(settings, "redpanda", "v24.2.7", 9093)?,
            schema_registry: DependencyConfig::read(settings, "kafka.schema.registry", "7.7.1", 8081)?,
            control_center: DependencyConfig::read(settings, "kafka.control.center", "7.7.1", 9021)?,
            conduktor: ConduktorConfig {
                console: DependencyConfig::read(settings, "conduktor", "1.17.3", 8080)?,
                license_key: settings.string("conduktor.license.key", ""),
            },
            conduktor_gateway: GatewayConfig {
                gateway: DependencyConfig::read(settings, "conduktor.gateway", "3.3.1", 8888)?,
                proxy_port: settings.number("conduktor.gateway.proxy.port", 6969)?,
            },
            debezium: DependencyConfig::read(settings, "debezium", "2.7.3.Final", 8083)?,
            postgres: DatabaseConfig::read(settings, "postgres", "16-alpine", 5432)?,
            mariadb: DatabaseConfig::read(settings, "mariadb", "11.4", 3306)?,
            mongodb: DependencyConfig::read(settings, "mongodb", "7.0", 27017)?,
            wiremock: DependencyConfig::read(settings, "wiremock", "3.9.1", 8080)?,
            localstack: LocalstackConfig {
                localstack: DependencyConfig::read(settings, "localstack", "3.8", 4566)?,
                services: grammar::parse_list(&settings.string("localstack.services", "s3")),
            },
            elasticsearch: DependencyConfig::read(settings, "elasticsearch", "8.15.2", 9200)?,
        })
    }

    /// Builds a snapshot from literal pairs, mainly for embedding and tests.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let values = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_settings(&Settings::new(values))
    }

    pub fn broker_enabled(&self) -> bool {
        self.kafka.broker.enabled || self.redpanda.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_pairs(&[]).unwrap();

        assert_eq!(config.container.name_prefix, "ct");
        assert_eq!(config.container.main_label, "main-container");
        assert!(!config.container.append_group_id);
        assert_eq!(config.service.name, "app");
        assert_eq!(config.service.instance_count, 1);
        assert_eq!(config.service.log_message, None);
        assert_eq!(config.service.startup_timeout, Duration::from_secs(180));
        assert!(!config.broker_enabled());
        assert!(config.kafka.topics.is_empty());
        assert_eq!(config.localstack.services, vec!["s3"]);
        assert!(config.additional_containers.is_empty());
    }

    #[test]
    fn composite_values_are_parsed() {
        let config = Config::from_pairs(&[
            ("kafka.enabled", "true"),
            ("kafka.topics", "orders, payments"),
            ("service.envvars", "SPRING_PROFILES_ACTIVE=test, LOG_LEVEL = debug"),
            ("service.startup.log.message", ".*Started.*"),
        ])
        .unwrap();

        assert!(config.broker_enabled());
        assert_eq!(config.kafka.topics, vec!["orders", "payments"]);
        assert_eq!(config.service.env["LOG_LEVEL"], "debug");
        assert_eq!(config.service.log_message.as_deref(), Some(".*Started.*"));
    }

    #[test]
    fn malformed_value_is_fatal() {
        let result = Config::from_pairs(&[("kafka.broker.count", "three")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn every_consulted_key_is_allowed_and_every_allowed_key_consulted() {
        let settings = Settings::default();
        Config::from_settings(&settings).unwrap();

        let consulted = settings.consulted();
        for key in consulted.iter() {
            assert!(keys::is_allowed(key), "{} is read but not allowed", key);
        }
        for key in keys::allowed_keys() {
            assert!(consulted.contains(&key), "{} is allowed but never read", key);
        }
    }

    #[test]
    fn log_message_must_be_a_valid_pattern() {
        let result = Config::from_pairs(&[("service.startup.log.message", "Started (app")]);

        match result {
            Err(ConfigError::InvalidValue { key, value, .. }) => {
                assert_eq!(key, "service.startup.log.message");
                assert_eq!(value, "Started (app");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn sasl_credentials_only_when_enabled() {
        let config = Config::from_pairs(&[("kafka.sasl.plain.username", "alice")]).unwrap();
        assert_eq!(config.kafka.sasl(), None);

        let config = Config::from_pairs(&[
            ("kafka.sasl.plain.enabled", "true"),
            ("kafka.sasl.plain.username", "alice"),
        ])
        .unwrap();
        let credentials = config.kafka.sasl().unwrap();
        assert!(credentials.jaas_config().contains("username=\"alice\""));
    }
}
