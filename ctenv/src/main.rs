use anyhow::{anyhow, Result};
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::info;
use std::{
    collections::BTreeMap as Map,
    fs,
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
};
use structopt::StructOpt;

use ctenv::{
    backends::DockerBackend,
    config::{environment_overrides, ConfigLoader},
    controller::Controller,
    discovery,
    identity::RunIdentity,
    plan, topology, Config, Environment,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ctenv",
    about = "Starts the containers a service needs for its tests and publishes their ports."
)]
struct Opt {
    #[structopt(long, default_value = ".", parse(from_os_str))]
    /// Directory searched for ct.properties, ct.yml or ct.yaml.
    config_dir: PathBuf,

    #[structopt(short = "D", number_of_values = 1, parse(try_from_str = parse_define))]
    /// Overrides a single key, e.g. -D kafka.enabled=true.
    define: Vec<(String, String)>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Reuses or provisions the environment and prints its coordinates.
    Up {
        #[structopt(short, long, parse(from_os_str))]
        /// Also write the coordinates as properties to this file.
        output: Option<PathBuf>,
    },
    /// Prints the coordinates of an environment that is already running.
    Ports,
    /// Prints the start order without touching the container runtime.
    Plan,
    /// Removes every container and network of the configured prefix.
    Down,
}

fn parse_define(value: &str) -> Result<(String, String)> {
    let mut parts = value.splitn(2, '=');
    match (parts.next(), parts.next()) {
        (Some(key), Some(value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(anyhow!("expected key=value, got {:?}", value)),
    }
}

/// `-D` definitions take precedence over `CT_*` environment variables.
fn config_loader(
    config_dir: &Path,
    environment: Map<String, String>,
    defines: Vec<(String, String)>,
) -> ConfigLoader {
    ConfigLoader::new(config_dir)
        .with_overrides(environment)
        .with_overrides(defines.into_iter().collect())
}

fn print_info(stdout: &mut impl Write, message: &str) -> Result<()> {
    stdout
        .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
        .queue(style::Print(message))?
        .queue(style::Print("\n"))?
        .flush()?;
    Ok(())
}

fn print_done(stdout: &mut impl Write, message: &str) -> Result<()> {
    stdout
        .queue(style::Print(message))?
        .queue(style::Print(" "))?
        .queue(style::PrintStyledContent("done".green().bold()))?
        .queue(style::Print("\n"))?
        .flush()?;
    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();
    let mut stdout = stdout();

    let loaded = config_loader(&opt.config_dir, environment_overrides(), opt.define).load()?;
    info!("configuration source {:?}", loaded.source);
    let config = loaded.config;

    match opt.command {
        Command::Up { output } => up(&config, &mut stdout, output)?,
        Command::Ports => {
            let mut backend = DockerBackend::connect()?;
            let identity = RunIdentity::with_group_id(&config.container, None);
            let lookup = discovery::discover(&mut backend, &config, &identity)?;
            writeln!(stdout, "{}", lookup.to_json()?)?;
        }
        Command::Plan => {
            topology::validate(&config)?;
            let identity = RunIdentity::new(&config.container);
            let plan = plan::build(&config, &identity);

            print_info(&mut stdout, &format!("network {}", plan.network))?;
            for stage in plan.stages.iter() {
                writeln!(stdout, "{}:", stage.kind)?;
                for container in stage.containers.iter() {
                    writeln!(stdout, "  {} ({})", container.name.0, container.image)?;
                }
            }
        }
        Command::Down => {
            let backend = DockerBackend::connect()?;
            let identity = RunIdentity::new(&config.container);
            let removed = Controller::new(Box::new(backend)).remove_runs(&identity)?;
            print_done(
                &mut stdout,
                &format!("removed {} container(s) of {}", removed, identity.prefix),
            )?;
        }
    }

    Ok(())
}

fn up(config: &Config, stdout: &mut impl Write, output: Option<PathBuf>) -> Result<()> {
    let backend = DockerBackend::connect()?;
    info!("connected to docker");

    let environment = Environment::start(config, Box::new(backend))?;
    if environment.reused() {
        print_info(stdout, "reusing the running environment")?;
    }

    writeln!(stdout, "{}", environment.lookup().to_json()?)?;
    if let Some(path) = output {
        fs::write(&path, environment.lookup().to_properties())?;
        print_info(stdout, &format!("wrote coordinates to {}", path.display()))?;
    }

    if config.container.stay_up || environment.reused() {
        return Ok(());
    }

    print_info(stdout, "press enter to tear the environment down")?;
    let mut line = String::new();
    stdin().read_line(&mut line)?;

    environment.teardown()?;
    print_done(stdout, "teardown")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_split_on_the_first_equals_sign() {
        assert_eq!(
            parse_define("service.envvars=A=1").unwrap(),
            ("service.envvars".to_string(), "A=1".to_string())
        );
        assert!(parse_define("kafka.enabled").is_err());
        assert!(parse_define("=true").is_err());
    }

    #[test]
    fn defines_win_over_the_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut environment = Map::new();
        environment.insert("kafka.broker.count".to_string(), "3".to_string());
        environment.insert("kafka.enabled".to_string(), "true".to_string());
        let defines = vec![parse_define("kafka.broker.count=2").unwrap()];

        let config = config_loader(dir.path(), environment, defines)
            .load()
            .unwrap()
            .config;

        assert_eq!(config.kafka.broker_count, 2);
        assert!(config.kafka.broker.enabled);
    }
}
