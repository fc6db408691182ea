//! Cross-dependency rules checked before any container exists.

use std::collections::BTreeSet as Set;

use crate::{config::Config, error::TopologyError};

pub fn validate(config: &Config) -> Result<(), TopologyError> {
    check_lifecycle(config)?;
    check_service(config)?;
    check_broker(config)?;
    check_broker_dependents(config)?;
    check_additional_containers(config)
}

fn check_lifecycle(config: &Config) -> Result<(), TopologyError> {
    if config.container.stay_up && config.container.append_group_id {
        return Err(TopologyError::MutuallyExclusive {
            first: "container.stay.up",
            second: "container.append.group.id",
        });
    }
    Ok(())
}

fn check_service(config: &Config) -> Result<(), TopologyError> {
    let service = &config.service;
    at_least("service.instance.count", service.instance_count, 1)?;

    // Each instance gets its own debug port counting up from the first.
    let last = u32::from(service.debug_port).saturating_add(service.instance_count - 1);
    if last > u32::from(u16::MAX) {
        return Err(TopologyError::PortRangeOverflow {
            first: service.debug_port,
            count: service.instance_count,
            last,
        });
    }
    Ok(())
}

fn check_broker(config: &Config) -> Result<(), TopologyError> {
    let kafka = &config.kafka;

    if kafka.broker.enabled && config.redpanda.enabled {
        return Err(TopologyError::MutuallyExclusive {
            first: "kafka.enabled",
            second: "redpanda.enabled",
        });
    }

    if kafka.sasl_plain_enabled && !config.broker_enabled() {
        return Err(TopologyError::MissingDependency {
            resource: "kafka.sasl.plain.enabled",
            required: "kafka.enabled",
        });
    }

    if !kafka.topics.is_empty() && !config.broker_enabled() {
        return Err(TopologyError::MissingDependency {
            resource: "kafka.topics",
            required: "kafka.enabled",
        });
    }

    at_least("kafka.broker.count", kafka.broker_count, 1)?;
    at_least("kafka.topic.partition.count", kafka.partition_count, 1)?;
    at_least("kafka.topic.replication.factor", kafka.replication_factor, 1)?;
    at_least("kafka.min.insync.replicas", kafka.min_insync_replicas, 1)?;

    not_exceeding(
        ("kafka.topic.replication.factor", kafka.replication_factor),
        ("kafka.broker.count", kafka.broker_count),
    )?;
    not_exceeding(
        ("kafka.min.insync.replicas", kafka.min_insync_replicas),
        ("kafka.broker.count", kafka.broker_count),
    )?;
    not_exceeding(
        ("kafka.min.insync.replicas", kafka.min_insync_replicas),
        ("kafka.topic.replication.factor", kafka.replication_factor),
    )?;

    if config.redpanda.enabled {
        if kafka.broker_count != 1 {
            return Err(TopologyError::Unsupported {
                resource: "redpanda",
                feature: format!("kafka.broker.count={}", kafka.broker_count),
            });
        }
        if kafka.sasl_plain_enabled {
            return Err(TopologyError::Unsupported {
                resource: "redpanda",
                feature: "kafka.sasl.plain.enabled".into(),
            });
        }
    }

    Ok(())
}

fn check_broker_dependents(config: &Config) -> Result<(), TopologyError> {
    let dependents = [
        ("kafka.schema.registry.enabled", config.schema_registry.enabled),
        ("kafka.control.center.enabled", config.control_center.enabled),
        ("conduktor.enabled", config.conduktor.console.enabled),
        ("conduktor.gateway.enabled", config.conduktor_gateway.gateway.enabled),
        ("debezium.enabled", config.debezium.enabled),
    ];

    if config.broker_enabled() {
        return Ok(());
    }

    match dependents.iter().find(|(_, enabled)| *enabled) {
        Some((resource, _)) => Err(TopologyError::MissingDependency {
            resource: *resource,
            required: "kafka.enabled",
        }),
        None => Ok(()),
    }
}

fn check_additional_containers(config: &Config) -> Result<(), TopologyError> {
    let mut seen = Set::new();
    seen.insert(config.service.name.as_str());

    for container in &config.additional_containers {
        if !seen.insert(container.name.as_str()) {
            return Err(TopologyError::DuplicateName(container.name.clone()));
        }
    }
    Ok(())
}

fn at_least(name: &'static str, value: u32, min: u32) -> Result<(), TopologyError> {
    if value < min {
        return Err(TopologyError::TooSmall { name, value, min });
    }
    Ok(())
}

fn not_exceeding(
    (left, left_value): (&'static str, u32),
    (right, right_value): (&'static str, u32),
) -> Result<(), TopologyError> {
    if left_value > right_value {
        return Err(TopologyError::Exceeds {
            left,
            left_value,
            right,
            right_value,
        });
    }
    Ok(())
}
