use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;

/// Which managed service a request targets. Each service has its own rule
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Database,
    Storage,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Concrete operation carried by a request.
///
/// Rule files speak in terms of [`Method`](crate::Method), which groups these
/// (`read` = get + list, `write` = create + update + delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// `create` and `update` carry a proposed new state.
    pub fn carries_payload(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Operations covered by the `write` method.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Stored state of the target document at evaluation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ResourceSnapshot {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("data".to_string(), Value::Object(self.data.clone()));
        Value::Object(obj)
    }
}

/// Proposed new state for `create` / `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSnapshot {
    /// Object size in bytes (storage uploads).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl IncomingSnapshot {
    pub(crate) fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(
            "size".to_string(),
            self.size.map(Value::from).unwrap_or(Value::Null),
        );
        obj.insert(
            "contentType".to_string(),
            self.content_type
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        obj.insert("data".to_string(), Value::Object(self.data.clone()));
        Value::Object(obj)
    }
}

/// A request descriptor as received from a caller.
///
/// `operation` is optional on the wire so that a missing operation can be
/// reported as [`RequestError::MissingOperation`] instead of failing
/// deserialisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub service: Service,
    /// Authenticated principal, `None` for unauthenticated callers.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub operation: Option<Operation>,
    pub path: String,
    #[serde(default)]
    pub resource: Option<ResourceSnapshot>,
    #[serde(default)]
    pub incoming: Option<IncomingSnapshot>,
}

impl AccessRequest {
    pub fn new(service: Service, operation: Operation, path: impl Into<String>) -> Self {
        Self {
            service,
            identity: None,
            operation: Some(operation),
            path: path.into(),
            resource: None,
            incoming: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_resource(mut self, resource: ResourceSnapshot) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_incoming(mut self, incoming: IncomingSnapshot) -> Self {
        self.incoming = Some(incoming);
        self
    }

    /// Reject requests that cannot be evaluated at all. These are caller
    /// bugs and are surfaced rather than silently denied.
    pub fn validate(&self) -> Result<ValidRequest<'_>, RequestError> {
        let operation = self.operation.ok_or(RequestError::MissingOperation)?;
        let segments = split_path(&self.path)?;
        if operation.carries_payload() && self.incoming.is_none() {
            return Err(RequestError::MissingIncoming { operation });
        }
        if let Some(identity) = &self.identity {
            if identity.is_empty() {
                return Err(RequestError::EmptyIdentity);
            }
        }
        Ok(ValidRequest {
            request: self,
            operation,
            segments,
        })
    }
}

/// An [`AccessRequest`] that passed [`AccessRequest::validate`].
#[derive(Debug)]
pub struct ValidRequest<'a> {
    pub request: &'a AccessRequest,
    pub operation: Operation,
    pub segments: Vec<&'a str>,
}

/// Split an absolute `/a/b/c` path into its segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, RequestError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| RequestError::InvalidPath {
            path: path.to_string(),
            reason: "path must start with '/'".to_string(),
        })?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Err(RequestError::InvalidPath {
            path: path.to_string(),
            reason: "path has no segments".to_string(),
        });
    }
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RequestError::InvalidPath {
            path: path.to_string(),
            reason: "empty path segment".to_string(),
        });
    }
    Ok(segments)
}
