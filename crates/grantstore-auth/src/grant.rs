//! Grant payload and the records it is persisted as.
//!
//! A [`TokenGrant`] is produced by the issuing logic and stored verbatim in a
//! [`BasicRecord`]. Access and refresh tokens additionally get an
//! [`IndexRecord`] that maps the token string back to the basic record.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use grantstore_storage::StorageError;

/// Grant issued by the authorization logic.
///
/// Token strings are empty when not issued. A grant carries either an
/// authorization code, or an access token with an optional refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_created_at: Option<OffsetDateTime>,
    #[serde(default, with = "humantime_serde")]
    pub code_expires_in: Duration,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_created_at: Option<OffsetDateTime>,
    #[serde(default, with = "humantime_serde")]
    pub access_expires_in: Duration,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh: String,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_created_at: Option<OffsetDateTime>,
    #[serde(default, with = "humantime_serde")]
    pub refresh_expires_in: Duration,
}

impl TokenGrant {
    /// Creates an empty grant for a client/user pair.
    #[must_use]
    pub fn new(client_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the authorization code.
    #[must_use]
    pub fn with_code(
        mut self,
        code: impl Into<String>,
        created_at: OffsetDateTime,
        expires_in: Duration,
    ) -> Self {
        self.code = code.into();
        self.code_created_at = Some(created_at);
        self.code_expires_in = expires_in;
        self
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_access(
        mut self,
        access: impl Into<String>,
        created_at: OffsetDateTime,
        expires_in: Duration,
    ) -> Self {
        self.access = access.into();
        self.access_created_at = Some(created_at);
        self.access_expires_in = expires_in;
        self
    }

    /// Sets the refresh token. A zero validity means the refresh token does
    /// not shorten the grant's lifetime.
    #[must_use]
    pub fn with_refresh(
        mut self,
        refresh: impl Into<String>,
        created_at: OffsetDateTime,
        expires_in: Duration,
    ) -> Self {
        self.refresh = refresh.into();
        self.refresh_created_at = Some(created_at);
        self.refresh_expires_in = expires_in;
        self
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn has_access(&self) -> bool {
        !self.access.is_empty()
    }

    pub fn has_refresh(&self) -> bool {
        !self.refresh.is_empty()
    }

    /// Absolute expiry of the authorization code.
    pub fn code_expires_at(&self) -> Result<OffsetDateTime, StorageError> {
        expires_at("code", self.code_created_at, self.code_expires_in)
    }

    /// Absolute expiry of the access token.
    pub fn access_expires_at(&self) -> Result<OffsetDateTime, StorageError> {
        expires_at("access", self.access_created_at, self.access_expires_in)
    }

    /// Absolute expiry of the refresh token, if it has a positive validity.
    pub fn refresh_expires_at(&self) -> Result<Option<OffsetDateTime>, StorageError> {
        if !self.has_refresh() || self.refresh_expires_in.is_zero() {
            return Ok(None);
        }
        expires_at("refresh", self.refresh_created_at, self.refresh_expires_in).map(Some)
    }

    /// Expiry shared by the basic record and every index record of an
    /// access-path grant: the earlier of access and refresh expiry.
    pub fn overall_expiry(&self) -> Result<OffsetDateTime, StorageError> {
        let access = self.access_expires_at()?;
        Ok(match self.refresh_expires_at()? {
            Some(refresh) => access.min(refresh),
            None => access,
        })
    }

    /// Classifies the grant into the write path it takes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidInput` for a grant with neither code
    /// nor access token, or with a refresh token but no access token.
    pub fn shape(&self) -> Result<GrantShape, StorageError> {
        if self.has_code() {
            return Ok(GrantShape::Code);
        }
        if !self.has_access() {
            if self.has_refresh() {
                return Err(StorageError::invalid_input(
                    "grant carries a refresh token without an access token",
                ));
            }
            return Err(StorageError::invalid_input(
                "grant carries neither an authorization code nor an access token",
            ));
        }
        Ok(GrantShape::Access {
            with_refresh: self.has_refresh(),
        })
    }
}

fn expires_at(
    which: &str,
    created_at: Option<OffsetDateTime>,
    validity: Duration,
) -> Result<OffsetDateTime, StorageError> {
    let created_at = created_at.ok_or_else(|| {
        StorageError::invalid_input(format!("{which} token has no creation time"))
    })?;
    let validity = time::Duration::try_from(validity)
        .map_err(|_| StorageError::invalid_input(format!("{which} validity out of range")))?;
    created_at
        .checked_add(validity)
        .ok_or_else(|| StorageError::invalid_input(format!("{which} expiry out of range")))
}

/// Write path a grant takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantShape {
    /// Single basic record keyed by the code.
    Code,
    /// Basic record under a generated ID plus index records.
    Access { with_refresh: bool },
}

/// Canonical stored grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicRecord {
    pub token: TokenGrant,
}

/// Maps an access or refresh token string to a basic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub basic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl IndexRecord {
    /// Builds an index record for `grant` pointing at `basic_id`.
    pub fn for_grant(basic_id: impl Into<String>, grant: &TokenGrant) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            basic_id: basic_id.into(),
            user_id: non_empty(&grant.user_id),
            client_id: non_empty(&grant.client_id),
        }
    }
}

/// One insert recorded in the transaction journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalOp {
    pub collection: String,
    pub id: String,
}

/// Journal entry written with each transactional fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ops: Vec<JournalOp>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
