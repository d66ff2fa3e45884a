use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tvmux::{
    buffer::StreamManager,
    config::{DataPaths, SystemInfo},
    context::AppContext,
    scheduler,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "tvmux")]
#[command(version)]
#[command(about = "IPTV proxy and EPG multiplexer with HDHomeRun emulation")]
#[command(long_about = None)]
struct Cli {
    /// Listening port
    #[arg(short, long, value_name = "PORT", default_value_t = 34400)]
    port: u16,

    /// Data directory (settings, channel table, merged outputs)
    #[arg(short, long, value_name = "DIR", default_value = "data")]
    data_path: String,

    /// Host:port downstream clients are told to connect to
    #[arg(long, value_name = "HOST:PORT")]
    domain: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("tvmux={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tvmux v{}", env!("CARGO_PKG_VERSION"));

    let paths = DataPaths::new(&cli.data_path);
    let system = SystemInfo {
        domain: cli
            .domain
            .unwrap_or_else(|| format!("localhost:{}", cli.port)),
        port: cli.port,
    };

    let context = AppContext::initialize(paths, system)?;
    info!("data directory: {}", context.paths.root().display());
    {
        let settings = context.settings.read().await;
        info!(
            "{} providers configured, update times {:?}",
            settings.providers.len(),
            settings.update_times
        );
    }

    let streams = StreamManager::new();

    let scheduler_context = context.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler(scheduler_context).await;
    });

    let server = WebServer::new(context, streams)?;
    server.serve().await
}
