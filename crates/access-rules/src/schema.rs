use serde::{Deserialize, Serialize};

use crate::request::{Operation, Service};

/// Top-level rule file loaded from YAML. One file per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Service whose requests these rules govern.
    pub service: Service,
    /// Path rules. Order is irrelevant for matching; precedence is decided
    /// by pattern specificity.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A path pattern bound to its allow clauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Path pattern, e.g. `/forums/{forumId}/comments/{commentId}`.
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Hard caps applied to `create` / `update` before any clause runs.
    #[serde(default)]
    pub limits: Option<Limits>,
    /// Allow clauses. Clauses covering the same operation are OR-ed.
    #[serde(default)]
    pub allow: Vec<AllowSpec>,
}

/// One `allow <methods>: if <condition>` clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowSpec {
    pub ops: Vec<Method>,
    /// Condition expression; see the crate docs for the grammar.
    pub condition: String,
}

/// Upload caps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Exclusive upper bound, e.g. `5MB`, `512KB`, `1048576`.
    #[serde(default)]
    pub max_size: Option<String>,
    /// Regex the whole content type must match, e.g. `image/.*`.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Operation names as written in rule files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Read,
    Get,
    List,
    Write,
    Create,
    Update,
    Delete,
}

impl Method {
    /// Whether a clause granted for `self` applies to `op`.
    pub fn covers(&self, op: Operation) -> bool {
        match self {
            Method::Read => matches!(op, Operation::Get | Operation::List),
            Method::Write => matches!(
                op,
                Operation::Create | Operation::Update | Operation::Delete
            ),
            Method::Get => op == Operation::Get,
            Method::List => op == Operation::List,
            Method::Create => op == Operation::Create,
            Method::Update => op == Operation::Update,
            Method::Delete => op == Operation::Delete,
        }
    }
}

/// Parse a human size such as `5MB` or `512 kb` into bytes (binary units).
pub fn parse_size_bytes(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num, unit) = trimmed.split_at(split);
    let value: u64 = num.parse().ok()?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_rule_file() {
        let yaml = r#"
version: "1.0"
service: storage
rules:
  - match: /users/{userId}/profile/{fileName}
    description: "Profile images"
    limits:
      max_size: 5MB
      content_type: "image/.*"
    allow:
      - ops: [read]
        condition: "request.auth != null"
      - ops: [write]
        condition: "request.auth != null && request.auth.uid == userId"
"#;
        let file: RuleFile = serde_yml::from_str(yaml).unwrap();
        assert_eq!(file.version, "1.0");
        assert_eq!(file.service, Service::Storage);
        assert_eq!(file.rules.len(), 1);

        let rule = &file.rules[0];
        assert_eq!(rule.pattern, "/users/{userId}/profile/{fileName}");
        let limits = rule.limits.as_ref().unwrap();
        assert_eq!(limits.max_size.as_deref(), Some("5MB"));
        assert_eq!(limits.content_type.as_deref(), Some("image/.*"));
        assert_eq!(rule.allow[1].ops, vec![Method::Write]);
    }

    #[test]
    fn rules_default_to_empty() {
        let yaml = r#"
version: "1.0"
service: database
"#;
        let file: RuleFile = serde_yml::from_str(yaml).unwrap();
        assert!(file.rules.is_empty());
    }

    #[test]
    fn method_coverage() {
        assert!(Method::Read.covers(Operation::Get));
        assert!(Method::Read.covers(Operation::List));
        assert!(!Method::Read.covers(Operation::Create));
        assert!(Method::Write.covers(Operation::Delete));
        assert!(!Method::Write.covers(Operation::Get));
        assert!(Method::Update.covers(Operation::Update));
        assert!(!Method::Update.covers(Operation::Create));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size_bytes("5MB"), Some(5 * 1024 * 1024));
        assert_eq!(parse_size_bytes("50 mb"), Some(50 * 1024 * 1024));
        assert_eq!(parse_size_bytes("512kb"), Some(512 * 1024));
        assert_eq!(parse_size_bytes("1048576"), Some(1_048_576));
        assert_eq!(parse_size_bytes("1TB"), None);
        assert_eq!(parse_size_bytes("MB"), None);
        assert_eq!(parse_size_bytes(""), None);
    }
}
