//! Every key a configuration source may carry.

/// Sections sharing the `enabled`, `image.tag`, `port` and
/// `container.logging.enabled` keys.
pub const DEPENDENCY_SECTIONS: &[&str] = &[
    "kafka",
    "redpanda",
    "kafka.schema.registry",
    "kafka.control.center",
    "conduktor",
    "conduktor.gateway",
    "debezium",
    "postgres",
    "mariadb",
    "mongodb",
    "wiremock",
    "localstack",
    "elasticsearch",
];

const DEPENDENCY_SUFFIXES: &[&str] = &["enabled", "image.tag", "port", "container.logging.enabled"];

const KEYS: &[&str] = &[
    "container.name.prefix",
    "container.main.label",
    "container.append.group.id",
    "container.stay.up",
    "service.name",
    "service.instance.count",
    "service.image.tag",
    "service.port",
    "service.debug.port",
    "service.envvars",
    "service.additional.filesystem.binds",
    "service.startup.health.endpoint",
    "service.startup.log.message",
    "service.startup.timeout.seconds",
    "service.container.logging.enabled",
    "additional.containers",
    "kafka.broker.count",
    "kafka.topics",
    "kafka.topic.partition.count",
    "kafka.topic.replication.factor",
    "kafka.min.insync.replicas",
    "kafka.sasl.plain.enabled",
    "kafka.sasl.plain.username",
    "kafka.sasl.plain.password",
    "conduktor.license.key",
    "conduktor.gateway.proxy.port",
    "postgres.database.name",
    "postgres.username",
    "postgres.password",
    "mariadb.database.name",
    "mariadb.username",
    "mariadb.password",
    "localstack.services",
];

pub fn is_allowed(key: &str) -> bool {
    if KEYS.contains(&key) {
        return true;
    }

    DEPENDENCY_SECTIONS.iter().any(|section| {
        key.strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|suffix| DEPENDENCY_SUFFIXES.contains(&suffix))
            .unwrap_or(false)
    })
}

pub fn allowed_keys() -> Vec<String> {
    let mut keys: Vec<String> = KEYS.iter().map(|key| key.to_string()).collect();
    for section in DEPENDENCY_SECTIONS {
        for suffix in DEPENDENCY_SUFFIXES {
            keys.push(format!("{}.{}", section, suffix));
        }
    }
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_section_keys() {
        assert!(is_allowed("kafka.enabled"));
        assert!(is_allowed("kafka.schema.registry.image.tag"));
        assert!(is_allowed("conduktor.gateway.container.logging.enabled"));
        assert!(is_allowed("kafka.topics"));
    }

    #[test]
    fn rejects_typos_and_partial_keys() {
        assert!(!is_allowed("kafka.enable"));
        assert!(!is_allowed("kafka"));
        assert!(!is_allowed("kafkaenabled"));
        assert!(!is_allowed("postgres.image"));
        assert!(!is_allowed("config.file"));
    }
}
