use agentpay_service::background;
use agentpay_service::settings::Settings;
use agentpay_service::Service;
use tracing::info;

/// Boots an agentpay process: loads `Settings` from the environment, wires the `Service`,
/// spawns the singleton background tasks (spec.md §5), then blocks until interrupted. No
/// front-end surface is started here (spec.md §1 Out of scope); external collaborators
/// embed this crate or call `Service` directly.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "agentpay_service=info,info".to_string()))
        .init();

    let settings = Settings::from_env()?;
    let service = Service::bootstrap(settings).await?;
    info!(existing_audit_entries = service.audit_entries().len(), "agentpay-service bootstrapped");

    let tasks = background::spawn_all(service);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping background tasks");
    for task in tasks {
        task.abort();
    }

    Ok(())
}
