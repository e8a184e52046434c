use anyhow::Context;

use tileerp_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tileerp_observability::init();

    let config = AppConfig::from_env()?;
    let app = tileerp_api::app::build_app(&config)
        .await
        .context("failed to build application services")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
