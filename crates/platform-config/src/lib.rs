//! # platform-config
//!
//! Settings for the managed backend that sit beside the access rules:
//! which sign-in methods are offered ([`auth`]) and which composite indexes
//! the document database maintains ([`indexes`]). Both are loaded from disk,
//! validated, and can be inspected or re-exported by the CLI.

pub mod auth;
mod error;
pub mod indexes;

pub use auth::{load_auth_config, AuthProviderConfig, SignInMethod};
pub use error::ConfigError;
pub use indexes::{load_indexes, CompositeIndex, IndexConfig, IndexField, QueryScope, SortOrder};
