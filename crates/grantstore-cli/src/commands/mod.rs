pub mod accounts;
pub mod maintenance;
pub mod tokens;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use grantstore_auth::{
    ClientStore, ExpiryEnforcer, MemoryLookupCache, SimpleUser, TokenStore, UserStore,
};
use grantstore_db_memory::InMemoryStore;
use grantstore_db_postgres::{PostgresStore, mask_password};
use grantstore_storage::DynDocumentStore;

use crate::settings::{Backend, Settings};

/// Stores wired from settings.
pub struct App {
    pub settings: Settings,
    pub backend: DynDocumentStore,
    pub tokens: TokenStore,
    pub clients: ClientStore,
    pub users: UserStore<SimpleUser>,
}

impl App {
    pub async fn open(settings: Settings) -> Result<Self> {
        let backend = open_backend(&settings).await?;
        let timeout = settings.operation_timeout;

        let mut tokens = TokenStore::new(backend.clone(), &settings.tokens)
            .context("invalid [tokens] settings")?
            .with_operation_timeout(timeout);
        if settings.cache.enabled {
            tokens = tokens.with_cache(Arc::new(MemoryLookupCache::new()), settings.cache.ttl);
        }

        let clients = ClientStore::new(backend.clone(), settings.client_collection()?)
            .with_operation_timeout(timeout);
        let users = UserStore::new(backend.clone(), settings.user_collection()?)
            .with_operation_timeout(timeout);

        Ok(Self {
            settings,
            backend,
            tokens,
            clients,
            users,
        })
    }

    /// Enforcer over every token collection.
    pub fn enforcer(&self) -> ExpiryEnforcer {
        ExpiryEnforcer::for_tokens(self.backend.clone(), self.tokens.collections())
            .with_poll_interval(self.settings.expiry.poll_interval)
    }
}

async fn open_backend(settings: &Settings) -> Result<DynDocumentStore> {
    match settings.storage.backend {
        Backend::Memory => {
            warn!("Using the in-memory backend; nothing persists after exit");
            Ok(Arc::new(InMemoryStore::new()))
        }
        Backend::Postgres => {
            let config = settings.storage.postgres.clone();
            info!(url = %mask_password(&config.url), "Connecting to PostgreSQL");
            let store = PostgresStore::new(config)
                .await
                .context("failed to connect to PostgreSQL")?;
            store.ping().await.context("PostgreSQL did not answer")?;
            Ok(Arc::new(store))
        }
    }
}
