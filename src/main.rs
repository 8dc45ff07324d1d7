use clap::{Parser, Subcommand};

mod daemon;

#[derive(Parser)]
#[command(name = "botmux", version, about = "Telegram bot multiplexing proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "botmux.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy: ingestion, control plane and egress.
    Start,
    /// Validate the configuration and print a summary.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = botmux_core::config::load(&cli.config)?;

    match cli.command {
        Commands::Start => daemon::run(config).await,
        Commands::Check => {
            println!("config: {}", cli.config);
            println!("telegram endpoint: {}", config.telegram.endpoint);
            println!("control plane: {}", config.grpc.listen);
            println!(
                "egress: {} (advertised as {})",
                config.http.listen, config.http.advertised_endpoint
            );
            println!("allowed methods: {}", config.http.allow.join(", "));
            println!("clients:");
            for client in &config.clients {
                println!("  {}", client.name);
            }
            Ok(())
        }
    }
}
