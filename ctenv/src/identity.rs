use rand::{distr::Alphanumeric, Rng};
use uuid::Uuid;

use crate::{config::ContainerConfig, models::ContainerName};

pub const LABEL_RUN: &str = "io.ctenv.run";
/// The bare name prefix, so cleanup can match a prefix exactly.
pub const LABEL_PREFIX: &str = "io.ctenv.prefix";
pub const LABEL_SESSION: &str = "io.ctenv.session";
pub const LABEL_RESOURCE: &str = "io.ctenv.resource";
pub const LABEL_MAIN: &str = "io.ctenv.main";
pub const LABEL_ADDITIONAL: &str = "io.ctenv.additional";
pub const LABEL_HASH: &str = "io.ctenv.hash";
/// Label testcontainers puts on its reaper; any running container carrying it
/// counts as an active cleanup sentinel.
pub const LABEL_REAPER: &str = "org.testcontainers.ryuk";

const GROUP_ID_LENGTH: usize = 6;

/// Naming and labelling scheme shared by every container of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunIdentity {
    pub prefix: String,
    pub main_label: String,
    pub group_id: Option<String>,
    pub session_id: String,
}

impl RunIdentity {
    pub fn new(config: &ContainerConfig) -> RunIdentity {
        let group_id = if config.append_group_id {
            Some(random_group_id())
        } else {
            None
        };

        RunIdentity::with_group_id(config, group_id)
    }

    pub fn with_group_id(config: &ContainerConfig, group_id: Option<String>) -> RunIdentity {
        RunIdentity {
            prefix: config.name_prefix.clone(),
            main_label: config.main_label.clone(),
            group_id,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// `<prefix>-<logicalName>[-<groupId>]`
    pub fn container_name(&self, logical_name: &str) -> ContainerName {
        ContainerName(self.qualify(logical_name))
    }

    pub fn network_name(&self) -> String {
        self.qualify("network")
    }

    /// Value of [`LABEL_RUN`] for this run.
    pub fn run_label(&self) -> String {
        match &self.group_id {
            Some(group_id) => format!("{}-{}", self.prefix, group_id),
            None => self.prefix.clone(),
        }
    }

    /// True for run labels written by any run sharing this prefix, that is
    /// `<prefix>` or `<prefix>-<groupId>`.
    pub fn owns_run_label(&self, run_label: &str) -> bool {
        self.run_group(run_label).is_some()
    }

    /// Network created by the run that wrote `run_label`.
    pub fn network_for_run_label(&self, run_label: &str) -> Option<String> {
        match self.run_group(run_label)? {
            Some(group_id) => Some(format!("{}-network-{}", self.prefix, group_id)),
            None => Some(format!("{}-network", self.prefix)),
        }
    }

    /// `Some(None)` for a plain run of this prefix, `Some(Some(id))` for a
    /// group-id run, `None` for anything else.
    fn run_group<'a>(&self, run_label: &'a str) -> Option<Option<&'a str>> {
        if run_label == self.prefix {
            return Some(None);
        }

        run_label
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|group_id| is_group_id(group_id))
            .map(Some)
    }

    fn qualify(&self, logical_name: &str) -> String {
        match &self.group_id {
            Some(group_id) => format!("{}-{}-{}", self.prefix, logical_name, group_id),
            None => format!("{}-{}", self.prefix, logical_name),
        }
    }
}

fn is_group_id(value: &str) -> bool {
    value.len() == GROUP_ID_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn random_group_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GROUP_ID_LENGTH)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect()
}
