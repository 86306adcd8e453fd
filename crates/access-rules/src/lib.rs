//! # access-rules
//!
//! Access-rule evaluation for the managed database and file storage
//! services. This crate loads YAML rule files, compiles path patterns and
//! condition expressions once, and decides each request with a fail-closed
//! interpreter that may look up other stored documents.
//!
//! ## Rule files
//!
//! ```yaml
//! version: "1.0"
//! service: database
//! rules:
//!   - match: /users/{userId}
//!     allow:
//!       - ops: [read, write]
//!         condition: "request.auth != null && request.auth.uid == userId"
//! ```
//!
//! `read` covers `get` and `list`; `write` covers `create`, `update` and
//! `delete`. Storage rules may carry `limits` (`max_size`, `content_type`)
//! that are checked before any condition on create and update.
//!
//! ## Conditions
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := sum ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" ) sum )?
//! sum     := product ( ( "+" | "-" ) product )*
//! product := postfix ( "*" postfix )*
//! postfix := primary ( "." ident | "[" or "]" | ".matches(" string ")" | ".size()" )*
//! primary := literal | ident | "[" list "]" | "(" or ")"
//!          | "get(" docpath ")" | "exists(" docpath ")" | "role(" or ")"
//! docpath := ( "/" ( ident | "$(" or ")" ) )+
//! ```
//!
//! Any evaluation error makes the clause false; a request is allowed only
//! when some clause for its operation evaluates cleanly to `true`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use access_rules::{loader, AccessRequest, EngineSettings, InMemoryStore, Operation,
//!     RulesEngine, Service};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let rules = loader::load_rules("config/database.rules.yaml")?;
//! let engine = RulesEngine::from_rule_files([&rules], EngineSettings::default())?;
//! let store = InMemoryStore::load("config/store.example.json")?;
//!
//! let request = AccessRequest::new(Service::Database, Operation::Get, "/users/alice")
//!     .with_identity("alice");
//! let decision = engine.check(&request, &store).await?;
//! println!("{decision:?}");
//! # Ok(())
//! # }
//! ```

mod decision;
mod error;
mod evaluator;
pub mod expr;
mod interpreter;
pub mod loader;
mod lookup;
pub mod matcher;
pub mod parser;
mod request;
mod schema;

// Re-export primary public API at crate root.
pub use decision::{AccessDecision, Verdict};
pub use error::{EvalError, LookupError, ParseError, RequestError};
pub use evaluator::{EngineSettings, MatchedRule, RuleTable, RulesEngine};
pub use lookup::{InMemoryStore, LookupResolver, Role, ROLE_FIELD, USERS_COLLECTION};
pub use request::{
    split_path, AccessRequest, IncomingSnapshot, Operation, ResourceSnapshot, Service,
    ValidRequest,
};
pub use schema::{parse_size_bytes, AllowSpec, Limits, Method, RuleFile, RuleSpec};
