//! Collection naming for the token store.

use serde::{Deserialize, Serialize};

use grantstore_storage::{CollectionRef, StorageError, validate_name};

pub const DEFAULT_DATABASE: &str = "oauth2";
pub const DEFAULT_TXN_COLLECTION: &str = "oauth2_txn";
pub const DEFAULT_BASIC_COLLECTION: &str = "oauth2_basic";
pub const DEFAULT_ACCESS_COLLECTION: &str = "oauth2_access";
pub const DEFAULT_REFRESH_COLLECTION: &str = "oauth2_refresh";

/// Logical kind of record the token store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Basic,
    Access,
    Refresh,
    /// Transaction journal.
    Txn,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Basic,
        RecordKind::Access,
        RecordKind::Refresh,
        RecordKind::Txn,
    ];
}

/// Names of the database and collections backing a token store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub database: String,
    pub txn_collection: String,
    pub basic_collection: String,
    pub access_collection: String,
    pub refresh_collection: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            txn_collection: DEFAULT_TXN_COLLECTION.to_string(),
            basic_collection: DEFAULT_BASIC_COLLECTION.to_string(),
            access_collection: DEFAULT_ACCESS_COLLECTION.to_string(),
            refresh_collection: DEFAULT_REFRESH_COLLECTION.to_string(),
        }
    }
}

impl TokenConfig {
    /// Places the collections in another database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    fn name_of(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Basic => &self.basic_collection,
            RecordKind::Access => &self.access_collection,
            RecordKind::Refresh => &self.refresh_collection,
            RecordKind::Txn => &self.txn_collection,
        }
    }

    /// Checks every name and that no two record kinds share a collection.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` describing the first problem.
    pub fn validate(&self) -> Result<(), StorageError> {
        validate_name("database", &self.database)?;
        for kind in RecordKind::ALL {
            validate_name("collection", self.name_of(kind))?;
        }

        for (i, a) in RecordKind::ALL.iter().enumerate() {
            for b in &RecordKind::ALL[i + 1..] {
                if self.name_of(*a) == self.name_of(*b) {
                    return Err(StorageError::configuration(format!(
                        "{a:?} and {b:?} records share collection '{}'",
                        self.name_of(*a)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves every record kind to its physical collection.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if the configuration is invalid.
    pub fn resolve(&self) -> Result<TokenCollections, StorageError> {
        self.validate()?;
        let collection = |kind| CollectionRef::new(&self.database, self.name_of(kind));
        Ok(TokenCollections {
            basic: collection(RecordKind::Basic)?,
            access: collection(RecordKind::Access)?,
            refresh: collection(RecordKind::Refresh)?,
            txn: collection(RecordKind::Txn)?,
        })
    }
}

/// Resolved collections of a token store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCollections {
    pub basic: CollectionRef,
    pub access: CollectionRef,
    pub refresh: CollectionRef,
    pub txn: CollectionRef,
}

impl TokenCollections {
    /// Physical collection for a record kind.
    #[must_use]
    pub fn collection(&self, kind: RecordKind) -> &CollectionRef {
        match kind {
            RecordKind::Basic => &self.basic,
            RecordKind::Access => &self.access,
            RecordKind::Refresh => &self.refresh,
            RecordKind::Txn => &self.txn,
        }
    }

    /// All collections, in `RecordKind::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = &CollectionRef> {
        RecordKind::ALL.into_iter().map(move |kind| self.collection(kind))
    }
}
