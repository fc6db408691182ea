use super::{Context, Resource, DEFAULT_STARTUP_TIMEOUT, SLOW_STARTUP_TIMEOUT};
use crate::{config::Config, models::{ContainerSpec, Readiness}};

pub(crate) fn containers(context: &Context) -> Vec<ContainerSpec> {
    let config = context.config;
    let mut containers = Vec::new();

    if config.wiremock.enabled {
        containers.push(wiremock(context));
    }
    if config.localstack.localstack.enabled {
        containers.push(localstack(context));
    }
    if config.elasticsearch.enabled {
        containers.push(elasticsearch(context));
    }

    containers
}

fn wiremock(context: &Context) -> ContainerSpec {
    let wiremock = &context.config.wiremock;

    context
        .dependency("wiremock", "wiremock/wiremock", wiremock)
        .command(vec![
            "--port".to_string(),
            wiremock.port.to_string(),
            "--global-response-templating".to_string(),
        ])
        .readiness(
            Readiness::Http {
                port: wiremock.port,
                path: "/__admin/mappings".into(),
                status: 200,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
}

fn localstack(context: &Context) -> ContainerSpec {
    let localstack = &context.config.localstack;

    context
        .dependency("localstack", "localstack/localstack", &localstack.localstack)
        .env("SERVICES", localstack.services.join(","))
        .env("GATEWAY_LISTEN", format!("0.0.0.0:{}", localstack.localstack.port))
        .readiness(
            Readiness::Http {
                port: localstack.localstack.port,
                path: "/_localstack/health".into(),
                status: 200,
            },
            DEFAULT_STARTUP_TIMEOUT,
        )
}

fn elasticsearch(context: &Context) -> ContainerSpec {
    let elasticsearch = &context.config.elasticsearch;

    context
        .dependency(
            "elasticsearch",
            "docker.elastic.co/elasticsearch/elasticsearch",
            elasticsearch,
        )
        .env("discovery.type", "single-node")
        .env("xpack.security.enabled", "false")
        .env("http.port", elasticsearch.port)
        .env("ES_JAVA_OPTS", "-Xms512m -Xmx512m")
        .readiness(
            Readiness::Http {
                port: elasticsearch.port,
                path: "/_cluster/health".into(),
                status: 200,
            },
            SLOW_STARTUP_TIMEOUT,
        )
}

pub(crate) fn resources(config: &Config) -> Vec<Resource> {
    vec![
        Resource::new("wiremock", config.wiremock.port, config.wiremock.enabled),
        Resource::new(
            "localstack",
            config.localstack.localstack.port,
            config.localstack.localstack.enabled,
        ),
        Resource::new(
            "elasticsearch",
            config.elasticsearch.port,
            config.elasticsearch.enabled,
        ),
    ]
}
