mod common;

use common::FakeBackend;
use ctenv::{
    controller::Controller,
    identity::{RunIdentity, LABEL_PREFIX, LABEL_RUN},
    Config, Environment,
};

fn identity() -> RunIdentity {
    let config = Config::from_pairs(&[]).unwrap();
    RunIdentity::new(&config.container)
}

#[test]
fn removes_plain_and_group_id_runs_of_the_prefix() {
    let backend = FakeBackend::new();
    backend.seed_network("ct-network");
    backend.seed_network("ct-network-k3v9q2");
    backend.seed_network("ct-foo-network");
    backend.seed(
        "ct-postgres",
        &[(LABEL_RUN, "ct"), (LABEL_PREFIX, "ct")],
        &[(5432, 40000)],
        true,
    );
    backend.seed(
        "ct-kafka",
        &[(LABEL_RUN, "ct"), (LABEL_PREFIX, "ct")],
        &[],
        false,
    );
    backend.seed(
        "ct-app-1-k3v9q2",
        &[(LABEL_RUN, "ct-k3v9q2"), (LABEL_PREFIX, "ct")],
        &[(8080, 40001)],
        true,
    );
    backend.seed(
        "ct-foo-postgres",
        &[(LABEL_RUN, "ct-foo"), (LABEL_PREFIX, "ct-foo")],
        &[(5432, 40002)],
        true,
    );
    backend.seed("unmanaged", &[], &[], true);

    let removed = Controller::new(backend.boxed())
        .remove_runs(&identity())
        .unwrap();

    assert_eq!(removed, 3);
    let state = backend.state();
    assert_eq!(state.names(), vec!["ct-foo-postgres", "unmanaged"]);
    assert_eq!(
        state.networks.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["ct-foo-network"]
    );
}

#[test]
fn longer_prefix_without_prefix_label_is_kept() {
    let backend = FakeBackend::new();
    backend.seed("ct-foo-postgres", &[(LABEL_RUN, "ct-foo")], &[], true);

    let removed = Controller::new(backend.boxed())
        .remove_runs(&identity())
        .unwrap();

    assert_eq!(removed, 0);
    assert_eq!(backend.state().names(), vec!["ct-foo-postgres"]);
}

#[test]
fn removes_what_an_environment_started() {
    let backend = FakeBackend::new();
    let config = Config::from_pairs(&[
        ("container.append.group.id", "true"),
        ("postgres.enabled", "true"),
    ])
    .unwrap();
    Environment::start(&config, backend.boxed()).unwrap();
    assert_eq!(backend.state().networks.len(), 1);

    let removed = Controller::new(backend.boxed())
        .remove_runs(&identity())
        .unwrap();

    assert_eq!(removed, 2);
    let state = backend.state();
    assert_eq!(state.names(), vec!["reaper"]);
    assert!(state.networks.is_empty());
}
