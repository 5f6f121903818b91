//! Settings loaded from an optional TOML file and `GRANTSTORE__...`
//! environment overrides, e.g. `GRANTSTORE__STORAGE__BACKEND=postgres`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use grantstore_auth::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_POLL_INTERVAL, TokenConfig};
use grantstore_auth::client::{DEFAULT_CLIENT_COLLECTION, DEFAULT_CLIENT_DATABASE};
use grantstore_auth::user::{DEFAULT_USER_COLLECTION, DEFAULT_USER_DATABASE};
use grantstore_db_postgres::PostgresConfig;
use grantstore_storage::CollectionRef;

/// File read when no path is given and it exists.
pub const DEFAULT_SETTINGS_FILE: &str = "grantstore.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    pub storage: StorageSettings,
    pub tokens: TokenConfig,
    pub expiry: ExpirySettings,
    pub cache: CacheSettings,
    pub clients: ClientSettings,
    pub users: UserSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            storage: StorageSettings::default(),
            tokens: TokenConfig::default(),
            expiry: ExpirySettings::default(),
            cache: CacheSettings::default(),
            clients: ClientSettings::default(),
            users: UserSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local; contents are lost on exit.
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: Backend,
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirySettings {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub database: String,
    pub collection: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            database: DEFAULT_CLIENT_DATABASE.into(),
            collection: DEFAULT_CLIENT_COLLECTION.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub database: String,
    pub collection: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            database: DEFAULT_USER_DATABASE.into(),
            collection: DEFAULT_USER_COLLECTION.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Settings {
    /// Collection holding client registrations.
    pub fn client_collection(&self) -> Result<CollectionRef> {
        CollectionRef::new(&self.clients.database, &self.clients.collection)
            .context("invalid [clients] settings")
    }

    /// Collection holding users.
    pub fn user_collection(&self) -> Result<CollectionRef> {
        CollectionRef::new(&self.users.database, &self.users.collection)
            .context("invalid [users] settings")
    }

    pub fn validate(&self) -> Result<()> {
        self.tokens.validate().context("invalid [tokens] settings")?;
        self.client_collection()?;
        self.user_collection()?;

        if self.operation_timeout.is_zero() {
            anyhow::bail!("operation_timeout must be greater than zero");
        }
        if self.expiry.poll_interval.is_zero() {
            anyhow::bail!("expiry.poll_interval must be greater than zero");
        }
        if self.storage.backend == Backend::Postgres && self.storage.postgres.pool_size == 0 {
            anyhow::bail!("storage.postgres.pool_size must be at least 1");
        }
        Ok(())
    }

    /// Loads settings from `path` (or the default file if present) and the
    /// environment, then validates them.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("settings file not found: {}", p.display());
                }
                builder = builder.add_source(File::from(p.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("GRANTSTORE")
                .try_parsing(true)
                .separator("__"),
        );

        let settings: Settings = builder
            .build()
            .context("failed to read settings")?
            .try_deserialize()
            .context("failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }
}
