use log::{debug, info};
use serde_yaml::Value;
use std::{
    collections::BTreeMap as Map,
    env, fs,
    path::{Path, PathBuf},
};

use super::{keys, Config, Settings};
use crate::error::ConfigError;

/// Override naming a configuration file explicitly.
pub const CONFIG_FILE_KEY: &str = "config.file";

const DEFAULT_FILE_NAMES: &[&str] = &["ct.properties", "ct.yml", "ct.yaml"];

const ENV_PREFIX: &str = "CT_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Overrides,
}

#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
}

/// Resolves the one source a run is configured from.
///
/// An explicitly named file wins, then the first default file found in the
/// configuration directory, then the allow-listed overrides on their own.
/// Sources are never merged.
#[derive(Clone, Debug)]
pub struct ConfigLoader {
    dir: PathBuf,
    overrides: Map<String, String>,
}

impl ConfigLoader {
    pub fn new<P: Into<PathBuf>>(dir: P) -> ConfigLoader {
        ConfigLoader {
            dir: dir.into(),
            overrides: Map::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: Map<String, String>) -> ConfigLoader {
        self.overrides.extend(overrides);
        self
    }

    pub fn with_override<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> ConfigLoader {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        if let Some(file) = self.overrides.get(CONFIG_FILE_KEY) {
            let path = self.dir.join(file.trim());
            info!("loading configuration from explicitly named {:?}", path);
            return self.load_file(path);
        }

        let default_file = DEFAULT_FILE_NAMES
            .iter()
            .map(|name| self.dir.join(name))
            .find(|path| path.is_file());

        if let Some(path) = default_file {
            info!("loading configuration from {:?}", path);
            return self.load_file(path);
        }

        let values = self
            .overrides
            .iter()
            .filter(|(key, _)| keys::is_allowed(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Map<_, _>>();
        info!(
            "no configuration file found in {:?}, using {} override(s)",
            self.dir,
            values.len()
        );

        let config = Config::from_settings(&Settings::new(values))?;
        Ok(LoadedConfig {
            config,
            source: ConfigSource::Overrides,
        })
    }

    fn load_file(&self, path: PathBuf) -> Result<LoadedConfig, ConfigError> {
        let values = read_file(&path)?;

        let unknown = values
            .keys()
            .filter(|key| !keys::is_allowed(key))
            .cloned()
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownKeys {
                path,
                keys: unknown,
            });
        }

        debug!("read {} key(s) from {:?}", values.len(), path);
        let config = Config::from_settings(&Settings::new(values))?;
        Ok(LoadedConfig {
            config,
            source: ConfigSource::File(path),
        })
    }
}

/// Collects `CT_`-prefixed environment variables as dotted keys, so
/// `CT_KAFKA_BROKER_COUNT` becomes `kafka.broker.count`.
pub fn environment_overrides() -> Map<String, String> {
    overrides_from_vars(env::vars())
}

fn overrides_from_vars<I>(vars: I) -> Map<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(ENV_PREFIX)
                .map(|key| (key.to_lowercase().replace('_', "."), value))
        })
        .collect()
}

fn read_file(path: &Path) -> Result<Map<String, String>, ConfigError> {
    let extension = path.extension().and_then(|ext| ext.to_str());
    let parse: fn(&str) -> Result<Map<String, String>, String> = match extension {
        Some("properties") => parse_properties,
        Some("yml") | Some("yaml") => parse_yaml,
        _ => {
            return Err(ConfigError::UnsupportedExtension {
                path: path.to_owned(),
            })
        }
    };

    let text = fs::read_to_string(path).map_err(|source| ConfigError::FileNotReadable {
        path: path.to_owned(),
        source,
    })?;

    parse(&text).map_err(|reason| ConfigError::Malformed {
        path: path.to_owned(),
        reason,
    })
}

fn parse_properties(text: &str) -> Result<Map<String, String>, String> {
    let mut values = Map::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = match line.find(|c: char| c == '=' || c == ':') {
            Some(index) => (&line[..index], &line[index + 1..]),
            None => (line, ""),
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(format!("line {:?} has no key", line));
        }
        values.insert(key.to_owned(), value.trim().to_owned());
    }

    Ok(values)
}

fn parse_yaml(text: &str) -> Result<Map<String, String>, String> {
    let mut values = Map::new();
    if text.trim().is_empty() {
        return Ok(values);
    }

    let document: Value = serde_yaml::from_str(text).map_err(|err| err.to_string())?;
    flatten(None, &document, &mut values)?;
    Ok(values)
}

fn flatten(prefix: Option<&str>, value: &Value, out: &mut Map<String, String>) -> Result<(), String> {
    match value {
        Value::Mapping(mapping) => {
            for (key, value) in mapping {
                let key = scalar(key).ok_or_else(|| format!("unsupported key {:?}", key))?;
                let key = match prefix {
                    Some(prefix) => format!("{}.{}", prefix, key),
                    None => key,
                };
                flatten(Some(key.as_str()), value, out)?;
            }
        }
        Value::Sequence(items) => {
            let key = prefix.ok_or_else(|| "top-level sequence".to_string())?;
            let items = items
                .iter()
                .map(|item| scalar(item).ok_or_else(|| format!("{} must only hold scalars", key)))
                .collect::<Result<Vec<_>, _>>()?;
            out.insert(key.to_owned(), items.join(","));
        }
        scalar_value => {
            let key = prefix.ok_or_else(|| "top-level scalar".to_string())?;
            let value = scalar(scalar_value).unwrap_or_default();
            out.insert(key.to_owned(), value);
        }
    }

    Ok(())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Bool(value) => Some(value.to_string()),
        Value::Number(value) => Some(value.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn environment_variables_become_dotted_keys() {
        let overrides = overrides_from_vars(vars(&[
            ("CT_KAFKA_BROKER_COUNT", "3"),
            ("CT_KAFKA_ENABLED", "true"),
            ("KAFKA_BROKER_COUNT", "7"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["kafka.broker.count"], "3");
        assert_eq!(overrides["kafka.enabled"], "true");
    }

    #[test]
    fn process_environment_is_read() {
        env::set_var("CT_SERVICE_INSTANCE_COUNT", "4");
        let overrides = environment_overrides();
        env::remove_var("CT_SERVICE_INSTANCE_COUNT");

        assert_eq!(overrides["service.instance.count"], "4");
    }

    #[test]
    fn later_overrides_win() {
        let dir = TempDir::new().unwrap();
        let environment = overrides_from_vars(vars(&[
            ("CT_KAFKA_BROKER_COUNT", "3"),
            ("CT_SERVICE_NAME", "from-env"),
        ]));

        let loaded = ConfigLoader::new(dir.path())
            .with_overrides(environment)
            .with_override("kafka.broker.count", "2")
            .load()
            .unwrap();

        assert_eq!(loaded.config.kafka.broker_count, 2);
        assert_eq!(loaded.config.service.name, "from-env");
        assert_eq!(loaded.source, ConfigSource::Overrides);
    }

    #[test]
    fn properties_file_is_preferred_over_yaml() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.properties", "service.name=from-properties\n");
        write(&dir, "ct.yml", "service:\n  name: from-yaml\n");

        let loaded = ConfigLoader::new(dir.path()).load().unwrap();

        assert_eq!(loaded.config.service.name, "from-properties");
        assert_eq!(loaded.source, ConfigSource::File(dir.path().join("ct.properties")));
    }

    #[test]
    fn yml_is_probed_before_yaml() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.yaml", "service:\n  name: from-yaml\n");
        write(&dir, "ct.yml", "service:\n  name: from-yml\n");

        let loaded = ConfigLoader::new(dir.path()).load().unwrap();
        assert_eq!(loaded.config.service.name, "from-yml");
    }

    #[test]
    fn yaml_is_flattened_into_dotted_keys() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "ct.yaml",
            "kafka:\n  enabled: true\n  broker:\n    count: 3\n  topic:\n    replication:\n      factor: 3\n  topics:\n    - orders\n    - payments\n",
        );

        let config = ConfigLoader::new(dir.path()).load().unwrap().config;

        assert!(config.kafka.broker.enabled);
        assert_eq!(config.kafka.broker_count, 3);
        assert_eq!(config.kafka.replication_factor, 3);
        assert_eq!(config.kafka.topics, vec!["orders", "payments"]);
    }

    #[test]
    fn unknown_key_in_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.properties", "kafka.enabled=true\nkafka.enable=true\n");

        match ConfigLoader::new(dir.path()).load() {
            Err(ConfigError::UnknownKeys { keys, .. }) => assert_eq!(keys, vec!["kafka.enable"]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn file_ignores_overrides() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.properties", "# comment\nservice.port: 9000\n");

        let config = ConfigLoader::new(dir.path())
            .with_override("service.port", "7000")
            .load()
            .unwrap()
            .config;

        assert_eq!(config.service.port, 9000);
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.properties", "service.port=9000\n");

        let result = ConfigLoader::new(dir.path())
            .with_override(CONFIG_FILE_KEY, "missing.properties")
            .load();

        assert!(matches!(result, Err(ConfigError::FileNotReadable { .. })));
    }

    #[test]
    fn explicit_file_must_have_known_extension() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.toml", "service.port=9000\n");

        let result = ConfigLoader::new(dir.path())
            .with_override(CONFIG_FILE_KEY, "ct.toml")
            .load();

        assert!(matches!(result, Err(ConfigError::UnsupportedExtension { .. })));
    }

    #[test]
    fn explicit_file_wins_over_defaults() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ct.properties", "service.name=default\n");
        write(&dir, "custom.yml", "service:\n  name: custom\n");

        let config = ConfigLoader::new(dir.path())
            .with_override(CONFIG_FILE_KEY, "custom.yml")
            .load()
            .unwrap()
            .config;

        assert_eq!(config.service.name, "custom");
    }

    #[test]
    fn overrides_only_consult_allowed_keys() {
        let dir = TempDir::new().unwrap();

        let loaded = ConfigLoader::new(dir.path())
            .with_override("kafka.enabled", "true")
            .with_override("some.stray.value", "ignored")
            .load()
            .unwrap();

        assert_eq!(loaded.source, ConfigSource::Overrides);
        assert!(loaded.config.kafka.broker.enabled);
    }

    #[test]
    fn malformed_override_is_fatal() {
        let dir = TempDir::new().unwrap();

        let result = ConfigLoader::new(dir.path())
            .with_override("service.port", "not-a-port")
            .load();

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
