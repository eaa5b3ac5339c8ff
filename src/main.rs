//! sitegen - streaming HTML generation proxy.

use sitegen::{api, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitegen=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Loaded configuration: {:?}", config);

    if config.hf_token.is_some() {
        tracing::info!("HF_TOKEN override set; anonymous quota disabled");
    } else if config.default_hf_token.is_none() {
        tracing::warn!("DEFAULT_HF_TOKEN not set; anonymous requests will reach the upstream without a credential");
    }

    api::serve(config).await
}
