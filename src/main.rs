//! linkarr daemon entry point

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkarr::app::App;
use linkarr::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("linkarr={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        source = %config.source_dir.display(),
        target = %config.target_dir.display(),
        workers = config.worker_count,
        "Starting linkarr"
    );

    App::run(config).await
}
