use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omni_relay_core::config::{Config, LoggingConfig};
use omni_relay_gateway::GatewayState;
use omni_relay_upstream::{GeminiLiveConnector, UpstreamConnector};

#[derive(Parser)]
#[command(
    name = "omni-relay",
    about = "Realtime voice relay between browser clients and Gemini Live",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Query a running relay's health endpoint
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (secrets redacted)
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };

    let mut directives = vec![level];
    if let Some(l) = logging {
        directives.extend(l.filters.iter().cloned());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(upstream) = config.upstream.as_mut() {
        if upstream.api_key.is_some() {
            upstream.api_key = Some("********".into());
        }
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;
    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("invalid configuration ({} errors)", errors.len());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            let bind = bind.unwrap_or_else(|| config.gateway_bind());

            let connector = GeminiLiveConnector::from_config(&config);
            if !connector.has_api_key() {
                tracing::warn!("No upstream API key; every session will be rejected");
            }
            tracing::info!(
                connector = connector.id(),
                endpoint = %connector.endpoint(),
                "Starting omni-relay on {bind}:{port}"
            );

            let state = Arc::new(GatewayState::new(Arc::new(config), Arc::new(connector)));
            omni_relay_gateway::start_gateway(state, port, &bind).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&redacted(&config))?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match redacted(&config).get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("configuration has {} errors", errors.len());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Status => {
            println!("omni-relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            let url = format!("http://127.0.0.1:{}/health", config.gateway_port());
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("Connections: {}", body["connections"]);
                    if let Some(sessions) = body["sessions"].as_array() {
                        for s in sessions {
                            println!("  {} since {}", s["conn_id"], s["connected_at"]);
                        }
                    }
                }
                Err(_) => println!("Status: not running ({url})"),
            }
        }
    }

    Ok(())
}
