use std::sync::Arc;

use gestio_auth::InMemoryMembershipDirectory;
use gestio_infra::EngineConfig;

use gestio_api::app::{self, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gestio_observability::init();

    let config = EngineConfig::from_env()?;

    let directory = Arc::new(InMemoryMembershipDirectory::new());
    match std::env::var(services::BOOTSTRAP_OWNERS) {
        Ok(grants) => {
            for (principal_id, tenant_id) in services::parse_owner_grants(&grants)? {
                services::grant_owner(&directory, principal_id, tenant_id);
            }
        }
        Err(_) => {
            tracing::warn!("{} not set; no principal can reach tenant routes", services::BOOTSTRAP_OWNERS);
        }
    }

    let bind_addr = config.bind_addr;
    let services = Arc::new(services::build_services(config, directory).await?);
    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
