use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::{AuditEntry, DecisionRecord};
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush at most this often while the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// Cloneable handle that submits [`AuditEntry`] values to a background
/// writer task.
#[derive(Clone)]
pub struct AuditSink {
    component: String,
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Open the log at `path` and spawn the writer task.
    ///
    /// The task writes each entry as a JSON line, flushes after a second of
    /// inactivity, and flushes once more and exits when the last sink clone
    /// is dropped. I/O errors are logged and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
        component: impl Into<String>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let writer = AuditWriter::new(path).await?;
        let handle = tokio::spawn(run_writer_loop(writer, rx));

        Ok((
            Self {
                component: component.into(),
                tx,
            },
            handle,
        ))
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Queue an entry. Waits while the channel is full; drops the entry
    /// with a warning if the writer task has exited.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed; entry dropped"
            );
        }
    }

    /// Record the outcome of one evaluated request.
    pub async fn log_decision(&self, decision: DecisionRecord) {
        self.log(AuditEntry::for_decision(self.component.clone(), decision))
            .await;
    }

    /// Record a lifecycle or configuration event.
    pub async fn log_event(&self, event_type: crate::AuditEventType, details: serde_json::Value) {
        self.log(AuditEntry::new(event_type, self.component.clone(), details))
            .await;
    }
}

async fn run_writer_loop(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        match tokio::time::timeout(flush_interval, rx.recv()).await {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write audit entry");
                } else {
                    dirty = true;
                }
            }
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!(path = %writer.path().display(), "audit writer stopped");
                return;
            }
            Err(_) => {
                if dirty {
                    match writer.flush().await {
                        Ok(()) => dirty = false,
                        Err(err) => tracing::error!(%err, "periodic audit log flush failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditEventType;
    use crate::writer::read_entries;

    #[tokio::test]
    async fn entries_are_flushed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let (sink, handle) = AuditSink::start(&path, "rulegate").await.unwrap();
        assert_eq!(sink.component(), "rulegate");
        sink.log_event(AuditEventType::ProcessStarted, serde_json::Value::Null)
            .await;
        let clone = sink.clone();
        clone
            .log_decision(DecisionRecord {
                service: "storage".into(),
                identity: None,
                operation: "get".into(),
                path: "/quizzes/q1/a.pdf".into(),
                allowed: false,
                matched_rule: Some("/quizzes/{quizId}/{fileName}".into()),
                reason: "no clause granted get".into(),
            })
            .await;
        drop(clone);
        drop(sink);
        handle.await.unwrap();

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, AuditEventType::ProcessStarted);
        assert_eq!(entries[1].event_type, AuditEventType::AccessDenied);
        assert_eq!(entries[1].component, "rulegate");
        assert_eq!(
            entries[1].decision.as_ref().map(|d| d.path.as_str()),
            Some("/quizzes/q1/a.pdf")
        );
    }
}
