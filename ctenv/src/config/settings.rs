use std::{
    cell::RefCell,
    collections::{BTreeMap as Map, BTreeSet as Set},
    fmt::Display,
    str::FromStr,
    time::Duration,
};

use crate::error::ConfigError;

/// Flat key/value pairs with typed accessors.
///
/// A key that is absent yields the default; a key that is present but does not
/// parse is an error.
#[derive(Debug, Default)]
pub struct Settings {
    values: Map<String, String>,
    consulted: RefCell<Set<String>>,
}

impl Settings {
    pub fn new(values: Map<String, String>) -> Settings {
        Settings {
            values,
            consulted: RefCell::new(Set::new()),
        }
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.consulted.borrow_mut().insert(key.to_owned());
        self.values.get(key).map(|value| value.trim())
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_owned()
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => parse_bool(value)
                .ok_or_else(|| ConfigError::invalid(key, value, "expected true or false")),
        }
    }

    pub fn number<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|err: T::Err| ConfigError::invalid(key, value, err)),
        }
    }

    pub fn seconds(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        self.number(key, default).map(Duration::from_secs)
    }

    /// Keys read so far, used to keep the allow-list honest.
    pub fn consulted(&self) -> Set<String> {
        self.consulted.borrow().clone()
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
