//! OAuth2 client registrations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use grantstore_storage::{CollectionRef, Document, DynDocumentStore, StorageError};

use crate::deadline::{DEFAULT_OPERATION_TIMEOUT, with_deadline};

pub const DEFAULT_CLIENT_DATABASE: &str = "oauth2";
pub const DEFAULT_CLIENT_COLLECTION: &str = "client";

/// A registered OAuth2 client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub user_id: String,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            domain: String::new(),
            user_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Client registrations in a single collection, keyed by client ID.
#[derive(Clone)]
pub struct ClientStore {
    store: DynDocumentStore,
    collection: CollectionRef,
    operation_timeout: Duration,
}

impl ClientStore {
    pub fn new(store: DynDocumentStore, collection: CollectionRef) -> Self {
        Self {
            store,
            collection,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    /// Looks up a client by ID.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Result<Option<ClientRecord>, StorageError> {
        with_deadline("client.get", self.operation_timeout, async {
            match self.store.find_by_id(&self.collection, id).await? {
                Some(document) => document.decode().map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the ID is taken and
    /// `StorageError::InvalidInput` for an empty ID.
    #[instrument(skip_all, fields(client_id = %client.id))]
    pub async fn add(&self, client: &ClientRecord) -> Result<(), StorageError> {
        if client.id.is_empty() {
            return Err(StorageError::invalid_input("client id must not be empty"));
        }
        let document = Document::from_serializable(&client.id, client)?;
        with_deadline("client.add", self.operation_timeout, async {
            self.store.insert(&self.collection, document).await
        })
        .await?;
        debug!("Client registered");
        Ok(())
    }

    /// Deletes a client. Missing clients are not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let removed = with_deadline("client.remove", self.operation_timeout, async {
            self.store.delete_by_id(&self.collection, id).await
        })
        .await?;
        debug!(removed, "Client removed");
        Ok(())
    }
}
