//! Realtime Database façade
//!
//! Per-instance handles over the database REST protocol: references,
//! one-shot reads, writes, and the online/offline switch the listener
//! tasks observe. Instances are registered by base URL; the empty URL
//! selects the configured default instance.

use crate::database::push_id::next_push_id;
use crate::database::query::QuerySpec;
use crate::database::snapshot::DataSnapshot;
use crate::error::DatabaseError;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Global map of base URLs to Database instances
static DB_INSTANCES: Lazy<RwLock<HashMap<String, Database>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Base URL of the instance the empty URL resolves to
static DEFAULT_URL: Lazy<RwLock<Option<String>>> = Lazy::new(|| RwLock::new(None));

/// A Realtime Database instance
///
/// Each base URL has at most one instance (singleton pattern). Use
/// [`Database::instance`] to resolve one at call entry.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    base_url: String,
    http_client: reqwest::Client,
    online_tx: watch::Sender<bool>,
}

/// Result of a `push` allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Generated child key
    pub key: String,
    /// Full path of the new child
    pub path: String,
}

impl Database {
    /// Register the instance the empty URL resolves to
    pub async fn configure_default(url: impl Into<String>) -> Result<Self, DatabaseError> {
        let url = url.into();
        let database = Self::named_instance(&url).await?;
        *DEFAULT_URL.write().await = Some(url);
        Ok(database)
    }

    /// Resolve an instance by base URL
    ///
    /// The empty URL selects the default instance and fails when none was
    /// configured; a non-empty URL creates the named instance on first use.
    pub async fn instance(url: &str) -> Result<Self, DatabaseError> {
        if !url.is_empty() {
            return Self::named_instance(url).await;
        }

        let default_url = DEFAULT_URL.read().await.clone();
        match default_url {
            Some(url) => Self::named_instance(&url).await,
            None => Err(DatabaseError::InstanceNotConfigured(
                "no default database configured".to_string(),
            )),
        }
    }

    async fn named_instance(url: &str) -> Result<Self, DatabaseError> {
        // Validate the base URL (error case first)
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DatabaseError::InstanceNotConfigured(format!(
                "invalid database URL: {url}"
            )));
        }
        let base_url = url.trim_end_matches('/').to_string();

        let mut instances = DB_INSTANCES.write().await;
        if let Some(database) = instances.get(&base_url) {
            return Ok(database.clone());
        }

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| DatabaseError::Internal(format!("Failed to create HTTP client: {e}")))?;
        let (online_tx, _) = watch::channel(true);

        let database = Database {
            inner: Arc::new(DatabaseInner {
                base_url: base_url.clone(),
                http_client,
                online_tx,
            }),
        };
        instances.insert(base_url, database.clone());
        Ok(database)
    }

    /// Base URL of this instance
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Get a reference to a location in this database
    pub fn reference(&self, path: &str) -> Reference {
        Reference {
            database: self.clone(),
            path: normalize_path(path),
        }
    }

    /// Resume realtime connections
    pub fn go_online(&self) {
        let _ = self.inner.online_tx.send(true);
    }

    /// Drop realtime connections until the instance goes online again
    pub fn go_offline(&self) {
        let _ = self.inner.online_tx.send(false);
    }

    /// Whether the instance is currently online
    pub fn is_online(&self) -> bool {
        *self.inner.online_tx.borrow()
    }

    /// Internal: watch handle for the online flag
    pub(crate) fn online_watch(&self) -> watch::Receiver<bool> {
        self.inner.online_tx.subscribe()
    }

    /// Internal: HTTP client of this instance
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.inner.http_client
    }

    /// Internal: REST URL of a location
    pub(crate) fn rest_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/.json", self.inner.base_url)
        } else {
            format!("{}/{}.json", self.inner.base_url, path)
        }
    }
}

/// A reference to a location in a database
#[derive(Clone)]
pub struct Reference {
    database: Database,
    path: String,
}

impl Reference {
    /// Path of this location relative to the root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Key of this location (None at the root)
    pub fn key(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|k| !k.is_empty())
    }

    /// Reference to a child location
    pub fn child(&self, segment: &str) -> Reference {
        let path = if self.path.is_empty() {
            normalize_path(segment)
        } else {
            format!("{}/{}", self.path, normalize_path(segment))
        };
        Reference {
            database: self.database.clone(),
            path,
        }
    }

    /// The database this reference belongs to
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// One-shot read of this location through a query descriptor
    pub async fn get(&self, query: &QuerySpec) -> Result<DataSnapshot, DatabaseError> {
        let mut params = query.to_params()?;
        params.push(("format".to_string(), "export".to_string()));

        let url = self.database.rest_url(&self.path);
        let response = self
            .database
            .http_client()
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        let raw = parse_rest_response(response).await?;

        Ok(DataSnapshot::new(self.key().map(str::to_string), raw))
    }

    /// Write a value (and optionally a priority) to this location
    ///
    /// Null value with null priority removes the location; null value with
    /// a priority writes only the priority.
    pub async fn set(
        &self,
        value: Option<Value>,
        priority: Option<Value>,
    ) -> Result<(), DatabaseError> {
        match (value, priority) {
            (None, None) => {
                let url = self.database.rest_url(&self.path);
                let response = self
                    .database
                    .http_client()
                    .delete(&url)
                    .send()
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                parse_rest_response(response).await?;
            }
            (None, Some(priority)) => {
                let path = if self.path.is_empty() {
                    ".priority".to_string()
                } else {
                    format!("{}/.priority", self.path)
                };
                let url = self.database.rest_url(&path);
                let response = self
                    .database
                    .http_client()
                    .put(&url)
                    .json(&priority)
                    .send()
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                parse_rest_response(response).await?;
            }
            (Some(value), priority) => {
                let body = match priority {
                    None => value,
                    Some(priority) => attach_priority(value, priority),
                };
                let url = self.database.rest_url(&self.path);
                let response = self
                    .database
                    .http_client()
                    .put(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
                parse_rest_response(response).await?;
            }
        }

        debug!(path = %self.path, "set completed");
        Ok(())
    }

    /// Merge a map of child updates into this location
    pub async fn update(&self, updates: Map<String, Value>) -> Result<(), DatabaseError> {
        let url = self.database.rest_url(&self.path);
        let response = self
            .database
            .http_client()
            .patch(&url)
            .json(&Value::Object(updates))
            .send()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        parse_rest_response(response).await?;
        Ok(())
    }

    /// Allocate a new child with a generated key
    ///
    /// Without a value the key is allocated locally and nothing is
    /// written; with one, the value is written to the new child.
    pub async fn push(&self, value: Option<Value>) -> Result<PushResult, DatabaseError> {
        let key = next_push_id();
        let child = self.child(&key);

        if let Some(value) = value {
            child.set(Some(value), None).await?;
        }

        Ok(PushResult {
            key,
            path: child.path,
        })
    }
}

/// Compose a written value with its priority the way the wire expects
fn attach_priority(value: Value, priority: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert(".priority".to_string(), priority);
            Value::Object(map)
        }
        leaf => serde_json::json!({ ".value": leaf, ".priority": priority }),
    }
}

/// Map a REST response to its JSON body or a DatabaseError
async fn parse_rest_response(response: reqwest::Response) -> Result<Value, DatabaseError> {
    let status = response.status();

    // Handle error responses first
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(DatabaseError::from_response(status.as_u16(), reason));
    }

    response
        .json()
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_named_instance_is_singleton() {
        let db1 = Database::instance("https://db-singleton.example.test").await.unwrap();
        let db2 = Database::instance("https://db-singleton.example.test/").await.unwrap();
        assert!(Arc::ptr_eq(&db1.inner, &db2.inner));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = Database::instance("not-a-url").await;
        assert!(matches!(result, Err(DatabaseError::InstanceNotConfigured(_))));
    }

    #[tokio::test]
    async fn test_configure_default_resolves_empty_url() {
        let configured = Database::configure_default("https://db-default.example.test")
            .await
            .unwrap();
        let resolved = Database::instance("").await.unwrap();
        assert_eq!(resolved.base_url(), configured.base_url());
    }

    #[tokio::test]
    async fn test_reference_paths() {
        let db = Database::instance("https://db-paths.example.test").await.unwrap();

        let root = db.reference("/");
        assert_eq!(root.path(), "");
        assert!(root.key().is_none());

        let nested = db.reference("/rooms/1/");
        assert_eq!(nested.path(), "rooms/1");
        assert_eq!(nested.key(), Some("1"));

        let child = nested.child("messages");
        assert_eq!(child.path(), "rooms/1/messages");
        assert_eq!(child.key(), Some("messages"));
    }

    #[tokio::test]
    async fn test_rest_url_shape() {
        let db = Database::instance("https://db-url.example.test").await.unwrap();
        assert_eq!(db.rest_url("rooms/1"), "https://db-url.example.test/rooms/1.json");
        assert_eq!(db.rest_url(""), "https://db-url.example.test/.json");
    }

    #[tokio::test]
    async fn test_online_flag_round_trip() {
        let db = Database::instance("https://db-online.example.test").await.unwrap();
        assert!(db.is_online());

        db.go_offline();
        assert!(!db.is_online());

        db.go_online();
        assert!(db.is_online());
    }

    #[tokio::test]
    async fn test_push_without_value_allocates_locally() {
        let db = Database::instance("https://db-push.example.test").await.unwrap();
        let result = db.reference("rooms/1").push(None).await.unwrap();

        assert_eq!(result.key.len(), 20);
        assert_eq!(result.path, format!("rooms/1/{}", result.key));
    }

    #[test]
    fn test_attach_priority_to_leaf() {
        let composed = attach_priority(json!(5), json!(1));
        assert_eq!(composed, json!({".value": 5, ".priority": 1}));
    }

    #[test]
    fn test_attach_priority_to_object() {
        let composed = attach_priority(json!({"a": 1}), json!("high"));
        assert_eq!(composed, json!({"a": 1, ".priority": "high"}));
    }
}
