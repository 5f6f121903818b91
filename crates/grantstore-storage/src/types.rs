//! Storage types for the document storage abstraction layer.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::StorageError;

/// Database and collection names double as SQL identifiers in some backends.
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid name regex"));

/// Validates a database or collection name.
///
/// # Errors
///
/// Returns `StorageError::Configuration` if the name is empty, too long,
/// or contains characters other than ASCII letters, digits and `_`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), StorageError> {
    if NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(StorageError::configuration(format!(
            "invalid {kind} name '{name}': expected [A-Za-z_][A-Za-z0-9_]{{0,62}}"
        )))
    }
}

/// A physical collection inside a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    database: String,
    name: String,
}

impl CollectionRef {
    /// Creates a validated collection reference.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if either name is invalid.
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Result<Self, StorageError> {
        let database = database.into();
        let name = name.into();
        validate_name("database", &database)?;
        validate_name("collection", &name)?;
        Ok(Self { database, name })
    }

    /// The database (namespace) holding this collection.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `database.collection`
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// A document as stored in a collection.
///
/// The body is always a JSON object. `expires_at` drives both read filtering
/// and background reaping; documents without it never expire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique key within the collection.
    pub id: String,
    /// Document content.
    pub body: Value,
    /// Absolute expiry timestamp.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl Document {
    /// Creates a document that never expires.
    #[must_use]
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
            expires_at: None,
        }
    }

    /// Sets the expiry timestamp.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Serializes `value` into a document body.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidDocument` if the value does not
    /// serialize to a JSON object.
    pub fn from_serializable<T: Serialize>(
        id: impl Into<String>,
        value: &T,
    ) -> Result<Self, StorageError> {
        let body = serde_json::to_value(value)?;
        if !body.is_object() {
            return Err(StorageError::invalid_document(
                "document body must be a JSON object",
            ));
        }
        Ok(Self::new(id, body))
    }

    /// Deserializes the document body.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidDocument` if the body does not match `T`.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, StorageError> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            StorageError::invalid_document(format!("document '{}': {e}", self.id))
        })
    }

    /// Returns `true` if the document has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Reads a top-level string field from the body.
    #[must_use]
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }
}

/// Equality filter over top-level string fields of a document body.
///
/// All conditions must match. Used for the low-cardinality scans the
/// token store performs; backends are not required to index these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    conditions: Vec<(String, String)>,
}

impl FieldFilter {
    /// Creates an empty filter (matches every document).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// The conditions in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// Returns `true` if there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates the filter against a document body.
    #[must_use]
    pub fn matches(&self, body: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(field, value)| body.get(field).and_then(Value::as_str) == Some(value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration;

    #[test]
    fn test_collection_ref_validation() {
        let c = CollectionRef::new("oauth2", "oauth2_basic").unwrap();
        assert_eq!(c.qualified(), "oauth2.oauth2_basic");
        assert_eq!(c.to_string(), "oauth2.oauth2_basic");

        assert!(CollectionRef::new("oauth2", "").is_err());
        assert!(CollectionRef::new("oauth2", "drop table;").is_err());
        assert!(CollectionRef::new("9db", "tokens").is_err());
        assert!(CollectionRef::new("oauth2", "a".repeat(64)).is_err());
        assert!(
            CollectionRef::new("oauth2", "x-y")
                .unwrap_err()
                .is_configuration()
        );
    }

    #[test]
    fn test_document_expiry() {
        let now = OffsetDateTime::now_utc();
        let doc = Document::new("a", json!({})).with_expiry(now + Duration::seconds(10));
        assert!(!doc.is_expired_at(now));
        assert!(doc.is_expired_at(now + Duration::seconds(10)));

        let forever = Document::new("b", json!({}));
        assert!(!forever.is_expired_at(now + Duration::days(10_000)));
    }

    #[test]
    fn test_document_from_serializable_requires_object() {
        assert!(Document::from_serializable("a", &json!({"k": "v"})).is_ok());
        assert!(Document::from_serializable("a", &"scalar").is_err());
    }

    #[test]
    fn test_field_filter_matches() {
        let body = json!({"user_id": "u1", "client_id": "c1", "n": 1});
        let body = body.as_object().unwrap();

        assert!(FieldFilter::new().matches(body));
        assert!(FieldFilter::new().eq("user_id", "u1").matches(body));
        assert!(
            FieldFilter::new()
                .eq("user_id", "u1")
                .eq("client_id", "c1")
                .matches(body)
        );
        assert!(!FieldFilter::new().eq("client_id", "c2").matches(body));
        assert!(!FieldFilter::new().eq("n", "1").matches(body));
        assert!(!FieldFilter::new().eq("missing", "x").matches(body));
    }
}
