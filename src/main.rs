use anyhow::{Context, Result};
use tracing::metadata::LevelFilter;
use voice_gateway::app::{AppState, GatewaySettings};
use voice_gateway::gateway;

fn setup_logging() {
    let filter = std::env::var("RVC_GATEWAY_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let settings = GatewaySettings::load().context("load gateway settings")?;
    let addr = settings.socket_addr()?;
    tracing::info!(
        "Forwarding jobs to `{} {}`",
        settings.tool.program,
        settings.tool.args.join(" ")
    );
    tracing::info!(
        "Weights in {}, datasets in {}, lock policy {:?}",
        settings.weights_dir.display(),
        settings.dataset_dir.display(),
        settings.lock_policy
    );

    let routes = gateway::routes(AppState::new(settings));
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .with_context(|| format!("bind {addr}"))?;

    tracing::info!("Gateway listening on {bound}");
    server.await;
    Ok(())
}
