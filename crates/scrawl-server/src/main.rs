use clap::Parser;
use scrawl_server::{Args, RelayConfig, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrawl_server=info,tower_http=info".into()),
        )
        .init();

    let config = RelayConfig::from(Args::parse());
    Server::bind(config).await?.run().await?;
    Ok(())
}
