use serde::{Deserialize, Serialize};

/// The outcome of evaluating a request against the rule tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub verdict: Verdict,
    /// Pattern of the rule that decided the request, if any rule matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Human-readable reason explaining the decision.
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn allow(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            matched_rule: Some(rule.into()),
            reason: reason.into(),
        }
    }

    /// Deny attributed to a matched rule.
    pub fn deny(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            matched_rule: Some(rule.into()),
            reason: reason.into(),
        }
    }

    /// Deny with no matching rule.
    pub fn deny_default(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            matched_rule: None,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}
