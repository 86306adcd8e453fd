use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{EvalError, LookupError};
use crate::expr::{BinOp, DocPath, Expr, PathPart};
use crate::lookup::LookupResolver;

/// Lookups already performed during one evaluation.
#[derive(Default)]
struct LookupState {
    issued: usize,
    documents: HashMap<String, Option<Value>>,
    roles: HashMap<String, Value>,
}

/// Evaluation scope for a single request.
///
/// Holds the variable bindings and a per-request memo of fetched documents.
/// Dropped when the request is decided; nothing survives across requests.
pub(crate) struct Interpreter<'a> {
    vars: &'a HashMap<String, Value>,
    resolver: &'a dyn LookupResolver,
    max_lookups: usize,
    state: Mutex<LookupState>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        vars: &'a HashMap<String, Value>,
        resolver: &'a dyn LookupResolver,
        max_lookups: usize,
    ) -> Self {
        Self {
            vars,
            resolver,
            max_lookups,
            state: Mutex::new(LookupState::default()),
        }
    }

    /// Evaluate a condition to a boolean. Any error is returned to the
    /// caller, which treats it as a deny.
    pub(crate) async fn check(&self, expr: &Expr) -> Result<bool, EvalError> {
        match self.eval(expr).await? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::Type(format!(
                "condition evaluated to {} instead of a bool",
                kind(&other)
            ))),
        }
    }

    pub(crate) fn lookups_issued(&self) -> usize {
        self.lock().issued
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LookupState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn eval<'s>(&'s self, expr: &'s Expr) -> BoxFuture<'s, Result<Value, EvalError>> {
        async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Var(name) => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::MissingField {
                        field: name.clone(),
                    }),
                Expr::Field(target, field) => {
                    let target = self.eval(target).await?;
                    field_of(target, field)
                }
                Expr::Index(target, index) => {
                    let target = self.eval(target).await?;
                    let index = self.eval(index).await?;
                    index_of(target, &index)
                }
                Expr::Not(inner) => Ok(Value::Bool(!as_bool(&self.eval(inner).await?)?)),
                Expr::And(lhs, rhs) => {
                    if !as_bool(&self.eval(lhs).await?)? {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(as_bool(&self.eval(rhs).await?)?))
                }
                Expr::Or(lhs, rhs) => {
                    if as_bool(&self.eval(lhs).await?)? {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(as_bool(&self.eval(rhs).await?)?))
                }
                Expr::Binary(op, lhs, rhs) => {
                    let lhs = self.eval(lhs).await?;
                    let rhs = self.eval(rhs).await?;
                    binary(*op, &lhs, &rhs)
                }
                Expr::Matches(target, regex) => match self.eval(target).await? {
                    Value::String(s) => Ok(Value::Bool(regex.is_match(&s))),
                    other => Err(EvalError::Type(format!(
                        "matches() on {}",
                        kind(&other)
                    ))),
                },
                Expr::Size(target) => match self.eval(target).await? {
                    Value::String(s) => Ok(Value::from(s.chars().count())),
                    Value::Array(a) => Ok(Value::from(a.len())),
                    Value::Object(o) => Ok(Value::from(o.len())),
                    other => Err(EvalError::Type(format!("size() on {}", kind(&other)))),
                },
                Expr::Get(path) => {
                    let path = self.resolve_path(path).await?;
                    self.document(&path)
                        .await?
                        .ok_or_else(|| EvalError::LookupFailed {
                            path,
                            reason: "document not found".to_string(),
                        })
                }
                Expr::Exists(path) => {
                    let path = self.resolve_path(path).await?;
                    Ok(Value::Bool(self.document(&path).await?.is_some()))
                }
                Expr::Role(uid) => {
                    let uid = match self.eval(uid).await? {
                        Value::String(s) => s,
                        Value::Null => {
                            return Err(EvalError::NullAccess {
                                field: "role".to_string(),
                            })
                        }
                        other => {
                            return Err(EvalError::Type(format!("role() of {}", kind(&other))))
                        }
                    };
                    self.role(&uid).await
                }
            }
        }
        .boxed()
    }

    async fn resolve_path(&self, path: &DocPath) -> Result<String, EvalError> {
        let mut out = String::new();
        for part in &path.0 {
            out.push('/');
            match part {
                PathPart::Literal(s) => out.push_str(s),
                PathPart::Interp(expr) => match self.eval(expr).await? {
                    Value::String(s) if !s.is_empty() && !s.contains('/') => out.push_str(&s),
                    Value::Number(n) => out.push_str(&n.to_string()),
                    other => {
                        return Err(EvalError::Type(format!(
                            "cannot use {} as a path segment",
                            kind(&other)
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    /// Reserve one lookup from the per-request budget.
    fn reserve(&self) -> Result<(), EvalError> {
        let mut state = self.lock();
        if state.issued >= self.max_lookups {
            return Err(EvalError::LookupLimit {
                limit: self.max_lookups,
            });
        }
        state.issued += 1;
        Ok(())
    }

    /// Fetch a document once per evaluation. `None` means not found.
    async fn document(&self, path: &str) -> Result<Option<Value>, EvalError> {
        let cached = self.lock().documents.get(path).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        self.reserve()?;
        trace!(path, "fetching document for condition");
        let fetched = match self.resolver.fetch_document(path).await {
            Ok(doc) => Some(doc.to_value()),
            Err(LookupError::NotFound(_)) => None,
            Err(err) => {
                return Err(EvalError::LookupFailed {
                    path: path.to_string(),
                    reason: err.to_string(),
                })
            }
        };
        self.lock()
            .documents
            .insert(path.to_string(), fetched.clone());
        Ok(fetched)
    }

    async fn role(&self, uid: &str) -> Result<Value, EvalError> {
        let cached = self.lock().roles.get(uid).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        self.reserve()?;
        trace!(uid, "fetching role for condition");
        let role = self
            .resolver
            .fetch_role(uid)
            .await
            .map_err(|err| EvalError::LookupFailed {
                path: format!("role of {uid}"),
                reason: err.to_string(),
            })?;
        let value = Value::String(role.as_str().to_string());
        self.lock().roles.insert(uid.to_string(), value.clone());
        Ok(value)
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn as_bool(v: &Value) -> Result<bool, EvalError> {
    v.as_bool()
        .ok_or_else(|| EvalError::Type(format!("expected bool, found {}", kind(v))))
}

fn field_of(target: Value, field: &str) -> Result<Value, EvalError> {
    match target {
        Value::Object(mut map) => map.remove(field).ok_or_else(|| EvalError::MissingField {
            field: field.to_string(),
        }),
        Value::Null => Err(EvalError::NullAccess {
            field: field.to_string(),
        }),
        other => Err(EvalError::Type(format!(
            "cannot read '{field}' of {}",
            kind(&other)
        ))),
    }
}

fn index_of(target: Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => field_of(Value::Object(map), key),
        (Value::Array(items), Value::Number(n)) => {
            let idx = n
                .as_u64()
                .ok_or_else(|| EvalError::Type(format!("invalid list index {n}")))?;
            usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| EvalError::MissingField {
                    field: format!("[{idx}]"),
                })
        }
        (Value::Null, _) => Err(EvalError::NullAccess {
            field: index.to_string(),
        }),
        (target, index) => Err(EvalError::Type(format!(
            "cannot index {} with {}",
            kind(&target),
            kind(index)
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Ok(x.cmp(&y));
            }
            let (x, y) = (x.as_f64(), y.as_f64());
            x.zip(y)
                .and_then(|(x, y)| x.partial_cmp(&y))
                .ok_or_else(|| EvalError::Type("incomparable numbers".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(EvalError::Type(format!(
            "cannot compare {} with {}",
            kind(a),
            kind(b)
        ))),
    }
}

fn contains(needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(needle, item))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(EvalError::Type(format!("map key must be a string, found {}", kind(other)))),
        },
        Value::Null => Err(EvalError::NullAccess {
            field: "in".to_string(),
        }),
        other => Err(EvalError::Type(format!("'in' on {}", kind(other)))),
    }
}

fn arithmetic(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
            let result = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                _ => x.checked_mul(y),
            };
            return result.map(Value::from).ok_or(EvalError::Overflow);
        }
        let (x, y) = x
            .as_f64()
            .zip(y.as_f64())
            .ok_or_else(|| EvalError::Type("non-finite number".to_string()))?;
        let result = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            _ => x * y,
        };
        return serde_json::Number::from_f64(result)
            .map(Value::Number)
            .ok_or(EvalError::Overflow);
    }
    match (op, a, b) {
        (BinOp::Add, Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}"))),
        (BinOp::Add, Value::Array(x), Value::Array(y)) => {
            Ok(Value::Array(x.iter().chain(y).cloned().collect()))
        }
        _ => Err(EvalError::Type(format!(
            "'{}' on {} and {}",
            op.symbol(),
            kind(a),
            kind(b)
        ))),
    }
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let result = match op {
        BinOp::Eq => values_equal(a, b),
        BinOp::Ne => !values_equal(a, b),
        BinOp::Lt => ordering(a, b)?.is_lt(),
        BinOp::Le => ordering(a, b)?.is_le(),
        BinOp::Gt => ordering(a, b)?.is_gt(),
        BinOp::Ge => ordering(a, b)?.is_ge(),
        BinOp::In => contains(a, b)?,
        BinOp::Add | BinOp::Sub | BinOp::Mul => return arithmetic(op, a, b),
    };
    Ok(Value::Bool(result))
}

/// Build the `request` object visible to conditions.
pub(crate) fn request_value(
    identity: Option<&str>,
    method: &str,
    path: &str,
    incoming: Option<Value>,
) -> Value {
    let auth = match identity {
        Some(uid) => {
            let mut auth = Map::new();
            auth.insert("uid".to_string(), Value::String(uid.to_string()));
            Value::Object(auth)
        }
        None => Value::Null,
    };
    let mut request = Map::new();
    request.insert("auth".to_string(), auth);
    request.insert("method".to_string(), Value::String(method.to_string()));
    request.insert("path".to_string(), Value::String(path.to_string()));
    request.insert("resource".to_string(), incoming.unwrap_or(Value::Null));
    Value::Object(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::InMemoryStore;
    use crate::parser::parse_condition;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::request::ResourceSnapshot;

    struct Unavailable;

    #[async_trait]
    impl LookupResolver for Unavailable {
        async fn fetch_document(&self, _path: &str) -> Result<ResourceSnapshot, LookupError> {
            Err(LookupError::Unavailable("backend down".to_string()))
        }
    }

    fn vars() -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        vars.insert(
            "request".to_string(),
            request_value(Some("u1"), "get", "/users/u1", None),
        );
        vars.insert("resource".to_string(), json!({ "data": { "members": ["u1", "u2"], "isPublic": false } }));
        vars.insert("userId".to_string(), json!("u1"));
        vars
    }

    fn store() -> InMemoryStore {
        InMemoryStore::from_json(json!({
            "/users/u1": { "userType": "teacher", "parents": [] },
            "/users/u2": {},
        }))
        .unwrap()
    }

    async fn eval_with(src: &str, resolver: &dyn LookupResolver) -> Result<bool, EvalError> {
        let vars = vars();
        let expr = parse_condition(src).unwrap();
        Interpreter::new(&vars, resolver, 10).check(&expr).await
    }

    async fn eval(src: &str) -> Result<bool, EvalError> {
        eval_with(src, &store()).await
    }

    #[tokio::test]
    async fn identity_comparison() {
        assert_eq!(eval("request.auth.uid == userId").await, Ok(true));
        assert_eq!(eval("request.auth != null").await, Ok(true));
        assert_eq!(eval("request.auth.uid != 'u2'").await, Ok(true));
    }

    #[tokio::test]
    async fn membership_and_snapshot_fields() {
        assert_eq!(eval("request.auth.uid in resource.data.members").await, Ok(true));
        assert_eq!(eval("'u3' in resource.data.members").await, Ok(false));
        assert_eq!(eval("resource.data.isPublic == true").await, Ok(false));
        assert_eq!(eval("'members' in resource.data").await, Ok(true));
        assert_eq!(eval("resource.data.members[1] == 'u2'").await, Ok(true));
        assert_eq!(eval("resource.data.members.size() == 2").await, Ok(true));
    }

    #[tokio::test]
    async fn arithmetic_and_ordering() {
        assert_eq!(eval("5 * 1024 * 1024 == 5242880").await, Ok(true));
        assert_eq!(eval("1 + 2 - 4 < 0").await, Ok(true));
        assert_eq!(eval("'abc' < 'abd'").await, Ok(true));
        assert_eq!(
            eval("9223372036854775807 + 1 > 0").await,
            Err(EvalError::Overflow)
        );
    }

    #[tokio::test]
    async fn missing_field_is_an_error() {
        assert_eq!(
            eval("resource.data.owner == request.auth.uid").await,
            Err(EvalError::MissingField {
                field: "owner".to_string()
            })
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_right_hand_errors() {
        assert_eq!(eval("true || resource.data.nope").await, Ok(true));
        assert_eq!(eval("false && resource.data.nope").await, Ok(false));
    }

    #[tokio::test]
    async fn left_hand_error_is_not_rescued() {
        assert!(eval("resource.data.nope == 1 || true").await.is_err());
    }

    #[tokio::test]
    async fn non_bool_condition_is_an_error() {
        assert!(matches!(eval("request.auth").await, Err(EvalError::Type(_))));
        assert!(matches!(eval("!'x'").await, Err(EvalError::Type(_))));
    }

    #[tokio::test]
    async fn get_and_role_lookups() {
        assert_eq!(
            eval("get(/users/$(request.auth.uid)).data.userType == 'teacher'").await,
            Ok(true)
        );
        assert_eq!(eval("role(request.auth.uid) in ['teacher', 'admin']").await, Ok(true));
        assert_eq!(eval("role('u2') == 'student'").await, Ok(true));
        assert_eq!(eval("exists(/users/u2) && !exists(/users/u9)").await, Ok(true));
        assert!(matches!(
            eval("get(/users/u9).data.userType == 'admin'").await,
            Err(EvalError::LookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_backend_fails() {
        assert!(matches!(
            eval_with("exists(/users/u1)", &Unavailable).await,
            Err(EvalError::LookupFailed { .. })
        ));
        assert!(matches!(
            eval_with("role('u1') == 'admin'", &Unavailable).await,
            Err(EvalError::LookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn repeated_lookups_are_memoised() {
        let vars = vars();
        let store = store();
        let expr = parse_condition(
            "get(/users/u1).data.userType == 'teacher' && get(/users/u1).data.parents.size() == 0",
        )
        .unwrap();
        let interp = Interpreter::new(&vars, &store, 10);
        assert_eq!(interp.check(&expr).await, Ok(true));
        assert_eq!(interp.lookups_issued(), 1);
    }

    #[tokio::test]
    async fn lookup_budget_is_enforced() {
        let vars = vars();
        let store = store();
        let expr = parse_condition("exists(/users/a) || exists(/users/b) || exists(/users/c)").unwrap();
        let interp = Interpreter::new(&vars, &store, 2);
        assert_eq!(
            interp.check(&expr).await,
            Err(EvalError::LookupLimit { limit: 2 })
        );
    }

    #[tokio::test]
    async fn path_interpolation_rejects_slashes() {
        assert!(matches!(
            eval("exists(/users/$('a/b'))").await,
            Err(EvalError::Type(_))
        ));
    }

    #[tokio::test]
    async fn role_of_anonymous_is_null_access() {
        let mut vars = vars();
        vars.insert("request".to_string(), request_value(None, "get", "/x", None));
        let store = store();
        let expr = parse_condition("role(request.auth.uid) == 'admin'").unwrap();
        assert!(matches!(
            Interpreter::new(&vars, &store, 10).check(&expr).await,
            Err(EvalError::NullAccess { .. })
        ));
    }
}
