//! The small delimited grammars packed into single configuration values.

use std::collections::BTreeMap as Map;

use super::{settings::parse_bool, AdditionalContainer};
use crate::error::ConfigError;

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// `"a, b ,c"` into `["a", "b", "c"]`, keeping input order.
pub fn parse_list(value: &str) -> Vec<String> {
    strip_whitespace(value)
        .split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `"k=v, k2 = v2"` into a map with keys and values trimmed.
pub fn parse_pairs(key: &str, value: &str) -> Result<Map<String, String>, ConfigError> {
    let mut pairs = Map::new();

    if value.trim().is_empty() {
        return Ok(pairs);
    }

    for pair in value.split(',') {
        let parts = pair.split('=').collect::<Vec<_>>();
        match parts.as_slice() {
            [name, value] if !name.trim().is_empty() => {
                pairs.insert(name.trim().to_owned(), value.trim().to_owned());
            }
            _ => {
                return Err(ConfigError::MalformedPair {
                    key: key.to_owned(),
                    pair: pair.to_owned(),
                })
            }
        }
    }

    Ok(pairs)
}

/// `name,port,debugPort,imageTag,loggingEnabled` entries separated by `:`.
pub fn parse_additional_containers(
    key: &str,
    value: &str,
) -> Result<Vec<AdditionalContainer>, ConfigError> {
    let value = strip_whitespace(value);
    if value.is_empty() {
        return Ok(Vec::new());
    }

    value
        .split(':')
        .map(|entry| {
            let fields = entry.split(',').collect::<Vec<_>>();
            if fields.len() != 5 {
                return Err(ConfigError::MalformedAdditionalContainer {
                    entry: entry.to_owned(),
                    fields: fields.len(),
                });
            }

            let port = |field: &str| {
                field
                    .parse::<u16>()
                    .map_err(|err| ConfigError::invalid(key, entry, err))
            };

            Ok(AdditionalContainer {
                name: fields[0].to_owned(),
                port: port(fields[1])?,
                debug_port: port(fields[2])?,
                image_tag: fields[3].to_owned(),
                container_logging_enabled: parse_bool(fields[4]).ok_or_else(|| {
                    ConfigError::invalid(key, entry, "logging flag must be true or false")
                })?,
            })
        })
        .collect()
}
