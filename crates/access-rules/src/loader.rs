use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::schema::RuleFile;

/// Load a [`RuleFile`] from a YAML file on disk.
///
/// Validates the file after deserialization (version, unique patterns,
/// non-empty clauses). Conditions are parsed later, when the file is
/// compiled into a [`RuleTable`](crate::RuleTable).
pub fn load_rules(path: impl AsRef<Path>) -> Result<RuleFile> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file: {}", path.display()))?;
    load_rules_from_str(&contents)
        .with_context(|| format!("failed to parse rules file: {}", path.display()))
}

/// Parse and validate a [`RuleFile`] from a YAML string.
pub fn load_rules_from_str(yaml: &str) -> Result<RuleFile> {
    let file: RuleFile = serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&file)?;
    Ok(file)
}

fn validate(file: &RuleFile) -> Result<()> {
    if file.version != "1.0" {
        bail!(
            "unsupported rules version '{}'; only '1.0' is supported",
            file.version
        );
    }

    let mut seen = HashSet::new();
    for rule in &file.rules {
        if rule.pattern.trim().is_empty() {
            bail!("rule pattern must not be empty");
        }
        if !seen.insert(rule.pattern.as_str()) {
            bail!("duplicate rule pattern: '{}'", rule.pattern);
        }
        if rule.allow.is_empty() {
            bail!("rule '{}' has no allow clauses", rule.pattern);
        }
        for (idx, clause) in rule.allow.iter().enumerate() {
            if clause.ops.is_empty() {
                bail!("rule '{}' clause {} lists no operations", rule.pattern, idx + 1);
            }
            if clause.condition.trim().is_empty() {
                bail!("rule '{}' clause {} has an empty condition", rule.pattern, idx + 1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Service;

    #[test]
    fn load_minimal_rules() {
        let yaml = r#"
version: "1.0"
service: database
rules: []
"#;
        let file = load_rules_from_str(yaml).unwrap();
        assert_eq!(file.service, Service::Database);
        assert!(file.rules.is_empty());
    }

    #[test]
    fn reject_wrong_version() {
        let yaml = r#"
version: "2"
service: database
"#;
        let err = load_rules_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("unsupported rules version"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_duplicate_patterns() {
        let yaml = r#"
version: "1.0"
service: database
rules:
  - match: /users/{userId}
    allow:
      - ops: [read]
        condition: "true"
  - match: /users/{userId}
    allow:
      - ops: [write]
        condition: "false"
"#;
        let err = load_rules_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate rule pattern"), "{err}");
    }

    #[test]
    fn reject_rule_without_clauses() {
        let yaml = r#"
version: "1.0"
service: storage
rules:
  - match: /files/{name}
"#;
        let err = load_rules_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("no allow clauses"), "{err}");
    }

    #[test]
    fn reject_clause_without_ops() {
        let yaml = r#"
version: "1.0"
service: storage
rules:
  - match: /files/{name}
    allow:
      - ops: []
        condition: "true"
"#;
        let err = load_rules_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("lists no operations"), "{err}");
    }

    #[test]
    fn reject_unknown_operation() {
        let yaml = r#"
version: "1.0"
service: storage
rules:
  - match: /files/{name}
    allow:
      - ops: [upsert]
        condition: "true"
"#;
        assert!(load_rules_from_str(yaml).is_err());
    }

    #[test]
    fn load_from_nonexistent_file() {
        let err = load_rules("/does/not/exist.yaml").unwrap_err();
        assert!(
            err.to_string().contains("failed to read rules file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_shipped_rule_files() {
        let db = load_rules_from_str(include_str!("../../../config/database.rules.yaml")).unwrap();
        assert_eq!(db.service, Service::Database);
        assert_eq!(db.rules.len(), 9);

        let storage =
            load_rules_from_str(include_str!("../../../config/storage.rules.yaml")).unwrap();
        assert_eq!(storage.service, Service::Storage);
        assert_eq!(storage.rules.len(), 4);
    }
}
