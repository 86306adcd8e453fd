use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LookupError;
use crate::request::{split_path, ResourceSnapshot};

/// Collection holding user records.
pub const USERS_COLLECTION: &str = "users";
/// Field on a user record naming the principal's role.
pub const ROLE_FIELD: &str = "userType";

/// Role attribute stored on a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Implicit role for users without (or with an unknown) `userType`.
    Student,
    Teacher,
    Parent,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Admin => "admin",
        }
    }

    /// Read the role from a user document.
    pub fn from_user_record(doc: &ResourceSnapshot) -> Self {
        match doc.data.get(ROLE_FIELD).and_then(Value::as_str) {
            Some("teacher") => Role::Teacher,
            Some("parent") => Role::Parent,
            Some("admin") => Role::Admin,
            _ => Role::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to stored documents, used by conditions that inspect other
/// documents (`get`, `exists`, `role`).
///
/// Implementations read raw stored state. They must never route back
/// through the rule engine.
#[async_trait]
pub trait LookupResolver: Send + Sync {
    /// Fetch the document at an absolute path such as `/users/alice`.
    async fn fetch_document(&self, path: &str) -> Result<ResourceSnapshot, LookupError>;

    /// Fetch the role of `identity` from its user record.
    async fn fetch_role(&self, identity: &str) -> Result<Role, LookupError> {
        let doc = self
            .fetch_document(&format!("/{USERS_COLLECTION}/{identity}"))
            .await?;
        Ok(Role::from_user_record(&doc))
    }
}

/// Document store held in memory, keyed by absolute path.
///
/// Backs the CLI and tests. Built from a JSON object mapping paths to
/// document data:
///
/// ```json
/// { "/users/alice": { "userType": "teacher" } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    docs: HashMap<String, Map<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. The path is normalised to
    /// `/seg/seg` form.
    pub fn insert(&mut self, path: &str, data: Map<String, Value>) -> Result<()> {
        let key = normalise(path)?;
        self.docs.insert(key, data);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert) taking a `json!` object.
    pub fn with_doc(mut self, path: &str, data: Value) -> Result<Self> {
        let Value::Object(map) = data else {
            bail!("document at {path} must be a JSON object");
        };
        self.insert(path, map)?;
        Ok(self)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(entries) = value else {
            bail!("document store must be a JSON object keyed by path");
        };
        let mut store = Self::new();
        for (path, data) in entries {
            store = store.with_doc(&path, data)?;
        }
        Ok(store)
    }

    /// Load a store from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read document store: {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse document store: {}", path.display()))?;
        Self::from_json(value)
            .with_context(|| format!("invalid document store: {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

fn normalise(path: &str) -> Result<String> {
    let segments = split_path(path)?;
    Ok(format!("/{}", segments.join("/")))
}

#[async_trait]
impl LookupResolver for InMemoryStore {
    async fn fetch_document(&self, path: &str) -> Result<ResourceSnapshot, LookupError> {
        let key = normalise(path).map_err(|_| LookupError::NotFound(path.to_string()))?;
        self.docs
            .get(&key)
            .map(|data| ResourceSnapshot::new(data.clone()))
            .ok_or(LookupError::NotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::from_json(json!({
            "/users/t1": { "userType": "teacher" },
            "users/s1": { "name": "Sam" },
            "/users/x1": { "userType": "wizard" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_document_normalises_paths() {
        let s = store();
        assert_eq!(s.len(), 3);
        let doc = s.fetch_document("/users/s1").await.unwrap();
        assert_eq!(doc.data["name"], "Sam");
        let doc = s.fetch_document("/users/t1/").await.unwrap();
        assert_eq!(doc.data["userType"], "teacher");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let err = store().fetch_document("/users/nobody").await.unwrap_err();
        assert_eq!(err, LookupError::NotFound("/users/nobody".to_string()));
    }

    #[tokio::test]
    async fn fetch_role_defaults_to_student() {
        let s = store();
        assert_eq!(s.fetch_role("t1").await.unwrap(), Role::Teacher);
        assert_eq!(s.fetch_role("s1").await.unwrap(), Role::Student);
        assert_eq!(s.fetch_role("x1").await.unwrap(), Role::Student);
        assert!(matches!(
            s.fetch_role("ghost").await,
            Err(LookupError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(InMemoryStore::from_json(json!({ "/users/a": 3 })).is_err());
        assert!(InMemoryStore::from_json(json!([1, 2])).is_err());
        assert!(InMemoryStore::from_json(json!({ "": {} })).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{ "/users/a": { "userType": "admin" } }"#).unwrap();
        let s = InMemoryStore::load(&path).unwrap();
        assert_eq!(s.len(), 1);

        let err = InMemoryStore::load(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read document store"));
    }
}
