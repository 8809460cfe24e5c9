use clap::{Parser, Subcommand};

use voxbridge_core::config::Config;

#[derive(Parser)]
#[command(
    name = "voxbridge",
    about = "Real-time voice call orchestrator — telephony audio in, transcribed, \
             answered by a streaming LLM with tools, spoken back out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: voxbridge.json5)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8080 or config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                let server = config.server.get_or_insert_with(Default::default);
                server.port = Some(port);
            }
            tracing::info!(
                port = config.port(),
                config = %config_path.display(),
                "Starting Voxbridge gateway"
            );
            let state = voxbridge_gateway::GatewayState::from_config(config)?;
            voxbridge_gateway::start_server(state).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
