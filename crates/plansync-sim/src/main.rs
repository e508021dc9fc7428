use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plansync_core::SyncConfig;
use plansync_sim::{run_simulator, SimulatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML file with session settings")
}

fn load_sync_config(args: &ArgMatches) -> anyhow::Result<SyncConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SimulatorConfig::default_sync()),
    }
}

fn required<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("plansync-sim")
        .version(plansync_core::VERSION)
        .about("PlanSync multi-session simulator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Run concurrent sessions against a flaky store")
                .arg(
                    Arg::new("sessions")
                        .long("sessions")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of sessions sharing the document"),
                )
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of rounds to run"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability of a transport failure per store call"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("json-logs")
                        .long("json-logs")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective session config as TOML")
                .arg(config_arg()),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            init_tracing(args.get_flag("json-logs"));
            let config = SimulatorConfig {
                sessions: required(args, "sessions")?,
                rounds: required(args, "rounds")?,
                seed: required(args, "seed")?,
                failure_rate: required(args, "failure-rate")?,
                sync: load_sync_config(args)?,
            };

            let report = run_simulator(config).await?;

            if args.get_flag("json") {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_sync_config(args)?;
            print!("{}", config.to_toml_string()?);
        }
        _ => {}
    }
    Ok(())
}
