use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use gatehouse::config::{AccessConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let server = ServerConfig::from_env();
    let access = AccessConfig::from_env();
    info!(
        target: "gatehouse",
        "gatehouse starting: RUST_LOG='{}', http_port={}, data_root='{}', default_source='{}'",
        rust_log, server.http_port, server.data_root, access.default_source
    );

    // No directory client is wired at the binary level; deployments embed the
    // engine and inject their own DirectoryClient implementation.
    gatehouse::server::run_with_config(server, access, None).await
}
