use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use insure_reliability::config::{load_config, ReliabilityConfig};
use insure_reliability::observability::logging::init_logging;
use insure_reliability::observability::metrics::init_metrics;
use insure_reliability::resilience::{
    BreakerRegistry, ResilienceError, ResilientClient, ResilientServiceClient, ServiceClient,
};
use reqwest::Method;

#[derive(Parser)]
#[command(name = "reliability-cli")]
#[command(about = "Inspect and exercise the reliability layer", long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file, then print the effective settings
    CheckConfig {
        path: PathBuf,
    },
    /// Call a URL once through the breaker, retry and timeout path
    Probe {
        url: String,

        #[arg(short, long, value_enum, default_value_t = ProbeMethod::Get)]
        method: ProbeMethod,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProbeMethod {
    Get,
    Delete,
}

impl From<ProbeMethod> for Method {
    fn from(method: ProbeMethod) -> Self {
        match method {
            ProbeMethod::Get => Method::GET,
            ProbeMethod::Delete => Method::DELETE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Probe { url, method } => {
            let config = match &cli.config {
                Some(path) => match load_config(path) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!("Error: {e}");
                        return ExitCode::FAILURE;
                    }
                },
                None => ReliabilityConfig::default(),
            };
            init_logging(&config.observability.log_level);
            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => init_metrics(addr),
                    Err(e) => tracing::warn!(error = %e, "Invalid metrics address, exporter disabled"),
                }
            }
            probe(&config, &url, method.into()).await
        }
    }
}

fn check_config(path: &Path) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match toml::to_string_pretty(&config) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: could not render config: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn probe(config: &ReliabilityConfig, url: &str, method: Method) -> ExitCode {
    let (base, path) = split_url(url);
    let client = match ServiceClient::new(base, config.timeouts.call()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let registry = BreakerRegistry::new(config.circuit_breaker.clone());
    let target = client.base_url().host_str().unwrap_or("target").to_string();
    let resilient = ResilientClient::from_registry(&target, &registry, &config.retries, &config.timeouts);
    let service = ResilientServiceClient::new(client, resilient);

    match service.send(method, path, None).await {
        Ok(body) => {
            match serde_json::to_string_pretty(&body) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{body}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", failure_class(&e));
            ExitCode::FAILURE
        }
    }
}

/// `http://host:port/a/b?q` → (`http://host:port`, `/a/b?q`).
fn split_url(url: &str) -> (&str, &str) {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].find('/') {
        Some(i) => url.split_at(authority_start + i),
        None => (url, ""),
    }
}

fn failure_class(err: &ResilienceError) -> &'static str {
    match err {
        ResilienceError::BreakerOpen { .. } => "BreakerOpen",
        ResilienceError::RetriesExhausted { .. } => "RetriesExhausted",
        ResilienceError::NonRetryable { .. } => "NonRetryableError",
        ResilienceError::Timeout { .. } => "Timeout",
    }
}
