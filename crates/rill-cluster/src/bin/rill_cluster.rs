use clap::Parser;

use rill_cluster::cli::ClusterCmd;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    ClusterCmd::parse().process().await
}
