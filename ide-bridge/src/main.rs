use clap::Parser;
use ide_bridge::{run, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Editor-side bridge for AI coding assistants", long_about = None)]
struct Cli {
    #[arg(
        long,
        default_value = "127.0.0.1:0",
        help = "Listen address (port 0 reuses the sticky port or picks a free one)"
    )]
    listen: SocketAddr,

    #[arg(
        long = "workspace",
        value_name = "DIR",
        help = "Workspace root; repeat for multi-root workspaces (defaults to the current dir)"
    )]
    workspace: Vec<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory for discovery records")]
    discovery_dir: Option<PathBuf>,

    #[arg(long, help = "Do not write discovery records or the sticky port file")]
    no_discovery: bool,

    #[arg(long, help = "Optional tool-name namespace accepted as `<ns>:tool`")]
    tool_namespace: Option<String>,

    #[arg(long, help = "Seconds a blocking openDiff waits for review")]
    blocking_timeout_secs: Option<u64>,

    #[arg(
        long,
        help = "OTLP endpoint for metrics (e.g., http://localhost:4318)"
    )]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn into_settings(self, mut settings: Settings) -> Settings {
        settings.listen = self.listen;
        if !self.workspace.is_empty() {
            settings.workspace = self.workspace;
        }
        if let Some(dir) = self.discovery_dir {
            settings.discovery_dir = dir;
        }
        if self.no_discovery {
            settings.publish_discovery = false;
        }
        if let Some(namespace) = self.tool_namespace {
            settings.tool_namespace = namespace;
        }
        if let Some(secs) = self.blocking_timeout_secs.filter(|secs| *secs > 0) {
            settings.blocking_diff_timeout = Duration::from_secs(secs);
        }
        if self.otlp_endpoint.is_some() {
            settings.otlp_endpoint = self.otlp_endpoint;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let settings = cli.into_settings(Settings::default().with_env_overrides());
    run(settings).await
}
