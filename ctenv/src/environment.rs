use log::info;

use crate::{
    bootstrap::{self, ExecTopicAdmin},
    config::Config,
    controller::Controller,
    discovery,
    error::{Error, Result},
    identity::{RunIdentity, LABEL_SESSION},
    lookup::{Lookup, PortMapping},
    plan::{self, Plan, StageKind},
    reuse::{self, Decision},
    services::ContainerBackend,
    topology,
};

/// A running environment and the coordinates published for it.
pub struct Environment {
    controller: Controller,
    identity: RunIdentity,
    decision: Decision,
    stay_up: bool,
    lookup: Lookup,
}

impl Environment {
    /// Validates, reuses or provisions, then discovers.
    ///
    /// Any failure aborts the run. Containers started before the failure are
    /// left to the reaper.
    pub fn start(config: &Config, backend: Box<dyn ContainerBackend>) -> Result<Environment> {
        topology::validate(config)?;

        let identity = RunIdentity::new(&config.container);
        let mut controller = Controller::new(backend);

        let decision = reuse::decide(controller.backend(), config, &identity)?;
        if decision == Decision::Provision {
            if !config.container.stay_up {
                controller
                    .backend()
                    .start_reaper((LABEL_SESSION, &identity.session_id))
                    .map_err(|err| Error::runtime("starting the reaper", err))?;
            }

            let plan = plan::build(config, &identity);
            provision(&mut controller, &plan, config, &identity)?;
        }

        let lookup = discovery::discover(controller.backend(), config, &identity)?;

        Ok(Environment {
            controller,
            identity,
            decision,
            stay_up: config.container.stay_up,
            lookup,
        })
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    pub fn mappings(&self) -> &[PortMapping] {
        self.lookup.mappings()
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn reused(&self) -> bool {
        self.decision == Decision::Reuse
    }

    /// Removes what this run started. Reused and stay-up environments are
    /// left running.
    pub fn teardown(mut self) -> Result<()> {
        if self.reused() || self.stay_up {
            info!("leaving the environment running");
            return Ok(());
        }

        self.controller.teardown()
    }
}

fn provision(
    controller: &mut Controller,
    plan: &Plan,
    config: &Config,
    identity: &RunIdentity,
) -> Result<()> {
    controller.prepare_network(plan)?;

    for stage in plan.stages.iter() {
        controller.start_stage(stage, &plan.network)?;

        if stage.kind == StageKind::Brokers {
            let broker = if config.redpanda.enabled {
                "redpanda"
            } else {
                "kafka"
            };
            let name = identity.container_name(broker);

            if let Some(id) = controller.started_id(&name).cloned() {
                let mut admin = ExecTopicAdmin::new(controller.backend(), id, config);
                bootstrap::create_topics(&mut admin, config)?;
            }
        }
    }

    Ok(())
}
