use access_rules::{AccessDecision, AccessRequest, LookupResolver, RulesEngine};
use anyhow::{bail, Context, Result};
use audit_log::{AuditEntry, AuditEventType, AuditSink, DecisionRecord};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// One output line of `rulegate check`.
#[derive(Debug, Serialize)]
pub struct CheckLine {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Decided(AccessDecision),
    /// The request was malformed and never evaluated.
    Rejected { error: String },
}

impl CheckLine {
    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, Outcome::Rejected { .. })
    }
}

/// Split a requests document into individual request values. Accepts a
/// single object or an array of objects.
pub fn parse_requests(json: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(json).context("requests file is not valid JSON")?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => bail!("expected a request object or an array, found {other}"),
    }
}

/// Evaluate every request in order, recording each outcome in the audit
/// trail when a sink is given.
pub async fn run_checks(
    engine: &RulesEngine,
    resolver: &dyn LookupResolver,
    requests: Vec<Value>,
    audit: Option<&AuditSink>,
) -> Vec<CheckLine> {
    let mut lines = Vec::with_capacity(requests.len());

    for (index, raw) in requests.into_iter().enumerate() {
        let path = raw.get("path").and_then(Value::as_str).map(str::to_string);

        let parsed: Result<AccessRequest, String> =
            serde_json::from_value(raw).map_err(|e| format!("malformed request: {e}"));
        let outcome = match parsed {
            Ok(request) => match engine.check(&request, resolver).await {
                Ok(decision) => {
                    if let Some(sink) = audit {
                        sink.log_decision(record(&request, &decision)).await;
                    }
                    Outcome::Decided(decision)
                }
                Err(err) => Outcome::Rejected {
                    error: err.to_string(),
                },
            },
            Err(error) => Outcome::Rejected { error },
        };

        if let Outcome::Rejected { error } = &outcome {
            warn!(index, path = ?path, %error, "request rejected");
            if let Some(sink) = audit {
                sink.log(AuditEntry::new(
                    AuditEventType::RequestRejected,
                    sink.component(),
                    serde_json::json!({ "index": index, "path": path, "error": error }),
                ))
                .await;
            }
        }

        lines.push(CheckLine {
            index,
            path,
            outcome,
        });
    }

    debug!(count = lines.len(), "requests checked");
    lines
}

fn record(request: &AccessRequest, decision: &AccessDecision) -> DecisionRecord {
    DecisionRecord {
        service: request.service.to_string(),
        identity: request.identity.clone(),
        operation: request
            .operation
            .map(|op| op.as_str().to_string())
            .unwrap_or_default(),
        path: request.path.clone(),
        allowed: decision.is_allowed(),
        matched_rule: decision.matched_rule.clone(),
        reason: decision.reason.clone(),
    }
}
