//! Append-only JSON-lines audit trail for access decisions.
//!
//! Every evaluated request, rejected request and lifecycle event becomes one
//! newline-terminated JSON object, written by a background task so callers
//! never block on disk I/O.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEventType, AuditSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, handle) = AuditSink::start("audit.jsonl", "rulegate").await?;
//! sink.log_event(AuditEventType::ProcessStarted, serde_json::json!({"version": "0.1.0"}))
//!     .await;
//! drop(sink);
//! handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, DecisionRecord};
pub use sink::AuditSink;
pub use writer::{read_entries, AuditWriteError, AuditWriter};
