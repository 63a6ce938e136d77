use mysql_cluster_controller::cli::{actions, commands, dispatch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = commands::new().get_matches();
    let action = dispatch::handler(&matches)?;
    actions::handle(action).await
}
