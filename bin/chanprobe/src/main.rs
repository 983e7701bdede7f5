//! ---
//! probe_section: "04-cli"
//! probe_subsection: "binary"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Binary entrypoint for the chanprobe conformance probe."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use url::Url;

use chanprobe_common::config::{ProbeConfig, SufficiencyConfig};
use chanprobe_common::logging::init_tracing;
use chanprobe_core::{TestOrchestrator, Verdict};
use chanprobe_transport::WsGateway;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Conformance probe for real-time publish/subscribe gateways",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "URL", help = "Override the gateway endpoint")]
    endpoint: Option<Url>,

    #[arg(long, value_enum, help = "Override the sufficiency mode")]
    sufficiency: Option<CliSufficiency>,

    #[arg(
        long,
        value_name = "N",
        help = "Override the sufficiency minimum (messages or per-field occurrences)"
    )]
    minimum: Option<usize>,

    #[arg(
        long,
        value_name = "MS",
        help = "Override the collection timeout in milliseconds"
    )]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSufficiency {
    Count,
    Coverage,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/chanprobe.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let loaded = ProbeConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;

    if let Some(endpoint) = cli.endpoint {
        config.gateway.url = endpoint;
    }
    if let Some(minimum) = cli.minimum {
        config.scenario.sufficiency = match &config.scenario.sufficiency {
            SufficiencyConfig::Count { .. } => SufficiencyConfig::Count { minimum },
            SufficiencyConfig::Coverage { .. } => SufficiencyConfig::Coverage { minimum },
        };
    }
    if let Some(mode) = cli.sufficiency {
        let minimum = match &config.scenario.sufficiency {
            SufficiencyConfig::Count { minimum } | SufficiencyConfig::Coverage { minimum } => {
                *minimum
            }
        };
        config.scenario.sufficiency = match mode {
            CliSufficiency::Count => SufficiencyConfig::Count { minimum },
            CliSufficiency::Coverage => SufficiencyConfig::Coverage { minimum },
        };
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.scenario.timeout = Duration::from_millis(timeout_ms);
    }
    config.validate()?;

    init_tracing("chanprobe", &config.logging)?;
    match &loaded.source {
        Some(source) => info!(config_path = %source.display(), "configuration loaded"),
        None => info!("running with built-in scenario defaults"),
    }

    let mut gateway = WsGateway::connect(&config.gateway.url, config.gateway.connect_timeout)
        .await
        .with_context(|| format!("failed to reach gateway at {}", config.gateway.url))?;

    let verdict = TestOrchestrator::new(&config).run(&mut gateway).await;
    match verdict {
        Verdict::Pass => {
            println!("chanprobe: success");
            Ok(ExitCode::SUCCESS)
        }
        Verdict::Fail(reason) => {
            eprintln!("chanprobe: {reason}");
            Ok(ExitCode::FAILURE)
        }
    }
}
