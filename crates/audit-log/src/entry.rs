use serde::{Deserialize, Serialize};

/// One line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    /// Component that emitted the event, e.g. `rulegate`.
    pub component: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
}

impl AuditEntry {
    /// Create an entry with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        component: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            component: component.into(),
            details,
            decision: None,
        }
    }

    /// Entry for an evaluated request. The event type follows the verdict.
    pub fn for_decision(component: impl Into<String>, decision: DecisionRecord) -> Self {
        let event_type = if decision.allowed {
            AuditEventType::AccessAllowed
        } else {
            AuditEventType::AccessDenied
        };
        let mut entry = Self::new(event_type, component, serde_json::Value::Null);
        entry.decision = Some(decision);
        entry
    }
}

/// The category of audit event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AccessAllowed,
    AccessDenied,
    /// A request was malformed and never evaluated.
    RequestRejected,
    RulesLoaded,
    ProcessStarted,
    ProcessStopped,
}

/// What was asked and how it was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub operation: String,
    pub path: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(allowed: bool) -> DecisionRecord {
        DecisionRecord {
            service: "database".into(),
            identity: Some("alice".into()),
            operation: "get".into(),
            path: "/users/alice".into(),
            allowed,
            matched_rule: Some("/users/{userId}".into()),
            reason: "clause 1 granted get".into(),
        }
    }

    #[test]
    fn decision_sets_event_type() {
        assert_eq!(
            AuditEntry::for_decision("rulegate", record(true)).event_type,
            AuditEventType::AccessAllowed
        );
        assert_eq!(
            AuditEntry::for_decision("rulegate", record(false)).event_type,
            AuditEventType::AccessDenied
        );
    }

    #[test]
    fn serializes_as_flat_json() {
        let entry = AuditEntry::for_decision("rulegate", record(true));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event_type"], "access_allowed");
        assert_eq!(json["decision"]["path"], "/users/alice");
        assert!(json.get("details").is_none());

        let started = AuditEntry::new(
            AuditEventType::ProcessStarted,
            "rulegate",
            serde_json::json!({ "version": "0.1.0" }),
        );
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["event_type"], "process_started");
        assert!(json.get("decision").is_none());
    }
}
