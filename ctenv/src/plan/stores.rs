use super::{Context, Resource, DEFAULT_STARTUP_TIMEOUT};
use crate::{config::Config, models::{ContainerSpec, Readiness}};

// postgres and mariadb log readiness once for the init server and once for
// the real one.
const POSTGRES_READY: &str = "database system is ready to accept connections";
const MARIADB_READY: &str = "ready for connections";
const MONGODB_READY: &str = "Waiting for connections";

pub(crate) fn containers(context: &Context) -> Vec<ContainerSpec> {
    let config = context.config;
    let mut containers = Vec::new();

    if config.postgres.database.enabled {
        containers.push(postgres(context));
    }
    if config.mariadb.database.enabled {
        containers.push(mariadb(context));
    }
    if config.mongodb.enabled {
        containers.push(mongodb(context));
    }

    containers
}

fn postgres(context: &Context) -> ContainerSpec {
    let postgres = &context.config.postgres;

    context
        .dependency("postgres", "postgres", &postgres.database)
        .env("POSTGRES_DB", &postgres.database_name)
        .env("POSTGRES_USER", &postgres.username)
        .env("POSTGRES_PASSWORD", &postgres.password)
        .env("PGPORT", postgres.database.port)
        .readiness(
            Readiness::LogMessage {
                pattern: POSTGRES_READY.into(),
                times: 2,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
}

fn mariadb(context: &Context) -> ContainerSpec {
    let mariadb = &context.config.mariadb;

    context
        .dependency("mariadb", "mariadb", &mariadb.database)
        .env("MARIADB_DATABASE", &mariadb.database_name)
        .env("MARIADB_USER", &mariadb.username)
        .env("MARIADB_PASSWORD", &mariadb.password)
        .env("MARIADB_ROOT_PASSWORD", &mariadb.password)
        .env("MARIADB_TCP_PORT", mariadb.database.port)
        .readiness(
            Readiness::LogMessage {
                pattern: MARIADB_READY.into(),
                times: 2,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
}

fn mongodb(context: &Context) -> ContainerSpec {
    let mongodb = &context.config.mongodb;

    context
        .dependency("mongodb", "mongo", mongodb)
        .command(vec![
            "mongod".to_string(),
            "--bind_ip_all".to_string(),
            "--port".to_string(),
            mongodb.port.to_string(),
        ])
        .readiness(
            Readiness::LogMessage {
                pattern: MONGODB_READY.into(),
                times: 1,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
}

pub(crate) fn resources(config: &Config) -> Vec<Resource> {
    vec![
        Resource::new(
            "postgres",
            config.postgres.database.port,
            config.postgres.database.enabled,
        ),
        Resource::new(
            "mariadb",
            config.mariadb.database.port,
            config.mariadb.database.enabled,
        ),
        Resource::new("mongodb", config.mongodb.port, config.mongodb.enabled),
    ]
}
