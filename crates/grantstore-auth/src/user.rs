//! User credential storage.
//!
//! The stored user shape is chosen by the caller at compile time through
//! [`UserRecord`]. [`SimpleUser`] covers the common case.

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use grantstore_storage::{CollectionRef, Document, DynDocumentStore, StorageError};

use crate::deadline::{DEFAULT_OPERATION_TIMEOUT, with_deadline};
use crate::password::{HashedPassword, hash_password, verify_password};

pub const DEFAULT_USER_DATABASE: &str = "oauth2";
pub const DEFAULT_USER_COLLECTION: &str = "user";

/// Capabilities a stored user type must provide.
pub trait UserRecord: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;

    /// Stored password hash (PHC string).
    fn password(&self) -> &str;

    fn salt(&self) -> &str;

    /// Replaces the stored hash and salt.
    fn set_hashed_password(&mut self, hashed: HashedPassword);

    /// Hashes `raw` with a fresh salt and stores the result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Internal` if hashing fails.
    fn set_raw_password(&mut self, raw: &str) -> Result<(), StorageError> {
        let hashed = hash_password(raw)
            .map_err(|e| StorageError::internal(format!("password hashing failed: {e}")))?;
        self.set_hashed_password(hashed);
        Ok(())
    }

    /// Returns `true` if `raw` matches the stored hash.
    fn matches(&self, raw: &str) -> bool {
        match verify_password(raw, self.password()) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(user_id = self.id(), error = %e, "Stored password hash is malformed");
                false
            }
        }
    }
}

/// Minimal user: an ID and a password hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimpleUser {
    pub id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub salt: String,
}

impl SimpleUser {
    /// Creates a user with a hashed copy of `raw`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Internal` if hashing fails.
    pub fn with_password(id: impl Into<String>, raw: &str) -> Result<Self, StorageError> {
        let mut user = Self {
            id: id.into(),
            ..Self::default()
        };
        user.set_raw_password(raw)?;
        Ok(user)
    }
}

impl UserRecord for SimpleUser {
    fn id(&self) -> &str {
        &self.id
    }

    fn password(&self) -> &str {
        &self.password
    }

    fn salt(&self) -> &str {
        &self.salt
    }

    fn set_hashed_password(&mut self, hashed: HashedPassword) {
        self.password = hashed.hash;
        self.salt = hashed.salt;
    }
}

/// Users of type `U` in one collection, keyed by user ID. Users never expire.
pub struct UserStore<U> {
    store: DynDocumentStore,
    collection: CollectionRef,
    operation_timeout: Duration,
    _user: PhantomData<fn() -> U>,
}

impl<U> Clone for UserStore<U> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection.clone(),
            operation_timeout: self.operation_timeout,
            _user: PhantomData,
        }
    }
}

impl<U: UserRecord> UserStore<U> {
    pub fn new(store: DynDocumentStore, collection: CollectionRef) -> Self {
        Self {
            store,
            collection,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            _user: PhantomData,
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

    /// Stores a new user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the ID is taken and
    /// `StorageError::InvalidInput` for an empty ID.
    #[instrument(skip_all, fields(user_id = user.id()))]
    pub async fn save(&self, user: &U) -> Result<(), StorageError> {
        if user.id().is_empty() {
            return Err(StorageError::invalid_input("user id must not be empty"));
        }
        let document = Document::from_serializable(user.id(), user)?;
        with_deadline("user.save", self.operation_timeout, async {
            self.store.insert(&self.collection, document).await
        })
        .await?;
        debug!("User saved");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find(&self, id: &str) -> Result<Option<U>, StorageError> {
        with_deadline("user.find", self.operation_timeout, async {
            match self.store.find_by_id(&self.collection, id).await? {
                Some(document) => document.decode().map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    /// Re-hashes and stores a new password for an existing user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidInput` if the user does not exist.
    #[instrument(skip(self, raw))]
    pub async fn update_password(&self, id: &str, raw: &str) -> Result<(), StorageError> {
        with_deadline("user.update_password", self.operation_timeout, async {
            let Some(document) = self.store.find_by_id(&self.collection, id).await? else {
                return Err(StorageError::invalid_input(format!("user '{id}' not found")));
            };
            let mut user: U = document.decode()?;
            user.set_raw_password(raw)?;

            let updated = Document::from_serializable(id, &user)?;
            if !self.store.replace(&self.collection, updated).await? {
                return Err(StorageError::invalid_input(format!("user '{id}' not found")));
            }
            Ok(())
        })
        .await?;
        debug!("Password updated");
        Ok(())
    }

    /// Deletes a user. Missing users are not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let removed = with_deadline("user.remove", self.operation_timeout, async {
            self.store.delete_by_id(&self.collection, id).await
        })
        .await?;
        debug!(removed, "User removed");
        Ok(())
    }
}
