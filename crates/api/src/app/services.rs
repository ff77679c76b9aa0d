//! Service wiring: pick the store, build the engine, hold the membership
//! directory the auth middleware resolves principals against.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use gestio_auth::{InMemoryMembershipDirectory, MembershipDirectory, PrincipalId, TenantMembership};
use gestio_core::TenantId;
use gestio_events::InMemoryEventBus;
use gestio_infra::{Engine, EngineConfig, EngineStore, InMemoryStore, PostgresStore, StoreError};

/// `principal@tenant` pairs (comma separated) granted the owner role at startup.
pub const BOOTSTRAP_OWNERS: &str = "GESTIO_BOOTSTRAP_OWNERS";

/// The engine as the HTTP layer sees it: store chosen at startup.
pub type SharedEngine = Engine<dyn EngineStore>;

pub struct AppServices {
    pub engine: SharedEngine,
    pub directory: Arc<dyn MembershipDirectory>,
}

impl AppServices {
    pub fn new(store: Arc<dyn EngineStore>, config: EngineConfig, directory: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            engine: Engine::new(store, InMemoryEventBus::new(), config),
            directory,
        }
    }

    /// In-memory store; used by tests and when no database is configured.
    pub fn in_memory(config: EngineConfig, directory: Arc<dyn MembershipDirectory>) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config, directory)
    }
}

/// Postgres when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(
    config: EngineConfig,
    directory: Arc<dyn MembershipDirectory>,
) -> Result<AppServices, StoreError> {
    let store: Arc<dyn EngineStore> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url, config.db_max_connections).await?;
            store.ensure_schema().await?;
            info!(max_connections = config.db_max_connections, "postgres store ready");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; state is kept in memory and lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    Ok(AppServices::new(store, config, directory))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("malformed owner grant '{0}': expected <principal-uuid>@<tenant-uuid>")]
    Malformed(String),
}

pub fn parse_owner_grants(raw: &str) -> Result<Vec<(PrincipalId, TenantId)>, BootstrapError> {
    raw.split(',')
        .map(str::trim)
        .filter(|grant| !grant.is_empty())
        .map(|grant| {
            let malformed = || BootstrapError::Malformed(grant.to_string());
            let (principal, tenant) = grant.split_once('@').ok_or_else(malformed)?;
            let principal_id = principal.trim().parse::<PrincipalId>().map_err(|_| malformed())?;
            let tenant_id = tenant.trim().parse::<TenantId>().map_err(|_| malformed())?;
            Ok((principal_id, tenant_id))
        })
        .collect()
}

pub fn grant_owner(directory: &InMemoryMembershipDirectory, principal_id: PrincipalId, tenant_id: TenantId) {
    directory.register(principal_id, TenantMembership::owner(tenant_id));
    info!(principal_id = %principal_id, tenant_id = %tenant_id, "owner membership granted");
}
