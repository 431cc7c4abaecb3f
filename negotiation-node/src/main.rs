use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use negotiation_node::config::{load_config, ConfigFormat};
use negotiation_node::scenario::load_scenario;
use negotiation_node::service::NodeService;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "negotiation-node",
    version,
    about = "Runs scripted confidential-negotiation scenarios and prints the event log"
)]
struct Cli {
    /// Path to configuration file (TOML or YAML).
    #[arg(long, default_value = "configs/negotiation-node.toml")]
    config: PathBuf,
    /// Explicit configuration format override.
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    /// Scenario script (JSON) to run.
    #[arg(long, default_value = "scenarios/end_to_end.json")]
    scenario: PathBuf,
    /// Log line format on stderr; filter with RUST_LOG.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Abort on the first failing step.
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli.config, cli.config_format)?;
    let scenario = load_scenario(&cli.scenario)?;
    let mut service = NodeService::from_config(&config, scenario.genesis_at)?;
    let report = service.run(&scenario, cli.fail_fast)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
