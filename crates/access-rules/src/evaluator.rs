use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::decision::AccessDecision;
use crate::error::{EvalError, RequestError};
use crate::expr::Expr;
use crate::interpreter::{request_value, Interpreter};
use crate::lookup::LookupResolver;
use crate::matcher::{Bindings, PathPattern, RESERVED_NAMES};
use crate::parser::parse_condition;
use crate::request::{split_path, AccessRequest, IncomingSnapshot, Operation, Service, ValidRequest};
use crate::schema::{parse_size_bytes, Limits, Method, RuleFile};

// ---------------------------------------------------------------------------
// Compiled rule representations
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledClause {
    /// 1-based position in the rule's `allow` list, for diagnostics.
    number: usize,
    methods: Vec<Method>,
    condition: Expr,
    lookup_sites: usize,
}

#[derive(Debug, Default)]
struct CompiledLimits {
    max_size: Option<u64>,
    content_type: Option<Regex>,
}

impl CompiledLimits {
    fn compile(limits: Option<&Limits>) -> Result<Self> {
        let Some(limits) = limits else {
            return Ok(Self::default());
        };
        let max_size = match &limits.max_size {
            Some(raw) => Some(
                parse_size_bytes(raw).with_context(|| format!("invalid max_size '{raw}'"))?,
            ),
            None => None,
        };
        let content_type = match &limits.content_type {
            Some(raw) => Some(
                Regex::new(&format!("^(?:{raw})$"))
                    .with_context(|| format!("invalid content_type pattern '{raw}'"))?,
            ),
            None => None,
        };
        Ok(Self {
            max_size,
            content_type,
        })
    }

    /// Hard caps on the incoming object. `Err` carries the deny reason.
    fn check(&self, incoming: Option<&IncomingSnapshot>) -> Result<(), String> {
        if self.max_size.is_none() && self.content_type.is_none() {
            return Ok(());
        }
        let incoming = incoming.ok_or("no incoming object to check against the rule's limits")?;

        if let Some(max) = self.max_size {
            match incoming.size {
                Some(size) if size < max => {}
                Some(size) => {
                    return Err(format!("size {size} bytes exceeds limit of {max} bytes"))
                }
                None => return Err("incoming size is required by this rule".to_string()),
            }
        }
        if let Some(re) = &self.content_type {
            match incoming.content_type.as_deref() {
                Some(ct) if re.is_match(ct) => {}
                Some(ct) => return Err(format!("content type '{ct}' is not permitted")),
                None => return Err("incoming content type is required by this rule".to_string()),
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct CompiledRule {
    pattern: PathPattern,
    description: Option<String>,
    limits: CompiledLimits,
    clauses: Vec<CompiledClause>,
}

// ---------------------------------------------------------------------------
// RuleTable
// ---------------------------------------------------------------------------

/// Compiled, immutable rule table for one service.
#[derive(Debug)]
pub struct RuleTable {
    service: Service,
    rules: Vec<CompiledRule>,
}

/// The rule selected for a concrete path, narrowed to one operation.
#[derive(Debug)]
pub struct MatchedRule<'t> {
    rule: &'t CompiledRule,
    operation: Operation,
    bindings: Bindings,
}

impl<'t> MatchedRule<'t> {
    pub fn pattern(&self) -> &'t str {
        self.rule.pattern.as_str()
    }

    pub fn description(&self) -> Option<&'t str> {
        self.rule.description.as_deref()
    }

    /// Placeholder values captured from the request path.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Conditions granting the operation, in file order. Empty when the
    /// rule exists but grants nothing for this operation.
    pub fn conditions(&self) -> impl Iterator<Item = &'t Expr> + '_ {
        self.clauses().map(|c| &c.condition)
    }

    fn clauses(&self) -> impl Iterator<Item = &'t CompiledClause> + '_ {
        let op = self.operation;
        self.rule
            .clauses
            .iter()
            .filter(move |c| c.methods.iter().any(|m| m.covers(op)))
    }
}

impl RuleTable {
    /// Compile a validated [`RuleFile`]: parse every pattern and condition,
    /// check variable scoping, and reject overlapping patterns.
    pub fn compile(file: &RuleFile) -> Result<Self> {
        let mut rules: Vec<CompiledRule> = Vec::with_capacity(file.rules.len());

        for spec in &file.rules {
            let pattern = PathPattern::parse(&spec.pattern)?;
            let limits = CompiledLimits::compile(spec.limits.as_ref())
                .with_context(|| format!("invalid limits for rule '{}'", spec.pattern))?;

            let mut in_scope: BTreeSet<String> =
                RESERVED_NAMES.iter().map(|s| s.to_string()).collect();
            in_scope.extend(pattern.variables().map(str::to_string));

            let mut clauses = Vec::with_capacity(spec.allow.len());
            for (idx, allow) in spec.allow.iter().enumerate() {
                let number = idx + 1;
                let condition = parse_condition(&allow.condition).with_context(|| {
                    format!(
                        "failed to parse condition {number} of rule '{}'",
                        spec.pattern
                    )
                })?;
                if let Some(unknown) = condition.free_vars().difference(&in_scope).next() {
                    bail!(
                        "condition {number} of rule '{}' references unknown variable '{unknown}'",
                        spec.pattern
                    );
                }
                clauses.push(CompiledClause {
                    number,
                    methods: allow.ops.clone(),
                    lookup_sites: condition.lookup_sites(),
                    condition,
                });
            }

            if let Some(other) = rules.iter().find(|r| r.pattern.same_shape(&pattern)) {
                bail!(
                    "rule patterns '{}' and '{}' overlap",
                    other.pattern,
                    pattern
                );
            }

            rules.push(CompiledRule {
                pattern,
                description: spec.description.clone(),
                limits,
                clauses,
            });
        }

        Ok(Self {
            service: file.service,
            rules,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Select the most specific rule for `path` and narrow it to
    /// `operation`. No match is [`EvalError::NoRuleMatched`], which callers
    /// must treat as a deny.
    pub fn match_rule(&self, path: &str, operation: Operation) -> Result<MatchedRule<'_>, EvalError> {
        let segments = split_path(path).map_err(|_| EvalError::NoRuleMatched {
            path: path.to_string(),
        })?;
        self.find(&segments, operation, path)
    }

    fn find(
        &self,
        segments: &[&str],
        operation: Operation,
        path: &str,
    ) -> Result<MatchedRule<'_>, EvalError> {
        self.rules
            .iter()
            .filter_map(|rule| rule.pattern.matches(segments).map(|b| (rule, b)))
            .max_by(|(a, _), (b, _)| a.pattern.cmp_specificity(&b.pattern))
            .map(|(rule, bindings)| MatchedRule {
                rule,
                operation,
                bindings,
            })
            .ok_or_else(|| EvalError::NoRuleMatched {
                path: path.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// RulesEngine
// ---------------------------------------------------------------------------

/// Runtime knobs for evaluation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Deadline for one request, lookups included.
    pub timeout: Duration,
    /// Maximum document/role lookups per request.
    pub max_lookups: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_lookups: 10,
        }
    }
}

/// Evaluates [`AccessRequest`]s against one rule table per service.
///
/// Immutable once built; share it behind an `Arc` across tasks.
pub struct RulesEngine {
    tables: HashMap<Service, RuleTable>,
    settings: EngineSettings,
}

impl std::fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<String> = self
            .tables
            .values()
            .map(|t| format!("{}({} rules)", t.service, t.len()))
            .collect();
        services.sort();
        f.debug_struct("RulesEngine")
            .field("tables", &services)
            .field("timeout_ms", &self.settings.timeout.as_millis())
            .field("max_lookups", &self.settings.max_lookups)
            .finish()
    }
}

impl RulesEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            tables: HashMap::new(),
            settings,
        }
    }

    /// Compile each file and register it under its service.
    pub fn from_rule_files<'f>(
        files: impl IntoIterator<Item = &'f RuleFile>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let mut engine = Self::new(settings);
        for file in files {
            let table = RuleTable::compile(file)
                .with_context(|| format!("failed to compile {} rules", file.service))?;
            engine.add_table(table)?;
        }
        Ok(engine)
    }

    pub fn add_table(&mut self, table: RuleTable) -> Result<()> {
        if self.tables.contains_key(&table.service) {
            bail!("rules for service '{}' are already loaded", table.service);
        }
        for rule in &table.rules {
            for clause in &rule.clauses {
                if clause.lookup_sites > self.settings.max_lookups {
                    warn!(
                        rule = %rule.pattern,
                        clause = clause.number,
                        lookups = clause.lookup_sites,
                        limit = self.settings.max_lookups,
                        "condition may exceed the per-request lookup budget"
                    );
                }
            }
        }
        self.tables.insert(table.service, table);
        Ok(())
    }

    pub fn table(&self, service: Service) -> Option<&RuleTable> {
        self.tables.get(&service)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Decide a request.
    ///
    /// Malformed requests are returned as `Err`. Every other failure
    /// (no rule, lookup error, condition error, timeout) is a deny.
    pub async fn check(
        &self,
        request: &AccessRequest,
        resolver: &dyn LookupResolver,
    ) -> Result<AccessDecision, RequestError> {
        let valid = request.validate()?;
        debug!(
            service = %request.service,
            operation = valid.operation.as_str(),
            path = %request.path,
            identity = ?request.identity,
            "evaluating request"
        );

        match tokio::time::timeout(self.settings.timeout, self.decide(&valid, resolver)).await {
            Ok(decision) => Ok(decision),
            Err(_) => {
                let millis = u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(path = %request.path, millis, "evaluation deadline exceeded");
                Ok(AccessDecision::deny_default(
                    EvalError::Timeout { millis }.to_string(),
                ))
            }
        }
    }

    async fn decide(&self, valid: &ValidRequest<'_>, resolver: &dyn LookupResolver) -> AccessDecision {
        let request = valid.request;
        let op = valid.operation;

        let Some(table) = self.tables.get(&request.service) else {
            return AccessDecision::deny_default(format!(
                "no rules loaded for service '{}'",
                request.service
            ));
        };

        let matched = match table.find(&valid.segments, op, &request.path) {
            Ok(m) => m,
            Err(err) => {
                debug!(path = %request.path, "no rule matched");
                return AccessDecision::deny_default(err.to_string());
            }
        };
        let pattern = matched.pattern();

        if op.is_write() {
            // A delete has no incoming object, so a rule with limits denies it.
            let incoming = if op.carries_payload() {
                request.incoming.as_ref()
            } else {
                None
            };
            if let Err(reason) = matched.rule.limits.check(incoming) {
                debug!(rule = pattern, %reason, "limit violated");
                return AccessDecision::deny(pattern, reason);
            }
        }

        let mut vars: HashMap<String, Value> = matched
            .bindings()
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        vars.insert(
            "request".to_string(),
            request_value(
                request.identity.as_deref(),
                op.as_str(),
                &request.path,
                request.incoming.as_ref().map(IncomingSnapshot::to_value),
            ),
        );
        vars.insert(
            "resource".to_string(),
            request
                .resource
                .as_ref()
                .map(|r| r.to_value())
                .unwrap_or(Value::Null),
        );

        let interp = Interpreter::new(&vars, resolver, self.settings.max_lookups);
        let mut considered = 0;
        let mut last_error = None;

        for clause in matched.clauses() {
            considered += 1;
            match interp.check(&clause.condition).await {
                Ok(true) => {
                    trace!(rule = pattern, clause = clause.number, "clause granted request");
                    return AccessDecision::allow(
                        pattern,
                        format!("clause {} granted {}", clause.number, op.as_str()),
                    );
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        rule = pattern,
                        clause = clause.number,
                        error = %err,
                        "condition failed; treating as false"
                    );
                    last_error = Some(err);
                }
            }
        }

        debug!(
            rule = pattern,
            considered,
            lookups = interp.lookups_issued(),
            "request denied"
        );
        let reason = match (considered, last_error) {
            (0, _) => format!("no clause grants {}", op.as_str()),
            (_, Some(err)) => format!("no clause granted {}; last error: {err}", op.as_str()),
            (_, None) => format!("no clause granted {}", op.as_str()),
        };
        AccessDecision::deny(pattern, reason)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
