use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::entry::AuditEntry;

/// Errors that can occur during audit log I/O.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to audit log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush audit log: {0}")]
    Flush(std::io::Error),

    #[error("failed to read audit log: {0}")]
    Read(std::io::Error),

    #[error("malformed audit line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
}

/// Buffered append-only writer producing one JSON object per line.
pub struct AuditWriter {
    path: PathBuf,
    file: BufWriter<tokio::fs::File>,
}

impl AuditWriter {
    /// Open (or create) the log at `path` in append mode, creating parent
    /// directories as needed.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AuditWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| AuditWriteError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .await
            .map_err(AuditWriteError::Write)
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.file.flush().await.map_err(AuditWriteError::Flush)
    }
}

/// Read every entry back from a JSON-lines audit log. Blank lines are
/// skipped.
pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditWriteError> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| AuditWriteError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();
    let mut number = 0;
    while let Some(line) = lines.next_line().await.map_err(AuditWriteError::Read)? {
        number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|source| AuditWriteError::Corrupt { line: number, source })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditEventType;

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");

        let mut writer = AuditWriter::new(&path).await.unwrap();
        assert_eq!(writer.path(), path.as_path());
        writer
            .write(&AuditEntry::new(
                AuditEventType::RulesLoaded,
                "rulegate",
                serde_json::json!({ "rules": 9 }),
            ))
            .await
            .unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut writer = AuditWriter::new(&path).await.unwrap();
        writer
            .write(&AuditEntry::new(
                AuditEventType::ProcessStopped,
                "rulegate",
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, AuditEventType::RulesLoaded);
        assert_eq!(entries[0].details["rules"], 9);
        assert_eq!(entries[1].event_type, AuditEventType::ProcessStopped);
    }

    #[tokio::test]
    async fn corrupt_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        tokio::fs::write(&path, "\nnot json\n").await.unwrap();
        let err = read_entries(&path).await.unwrap_err();
        assert!(matches!(err, AuditWriteError::Corrupt { line: 2, .. }), "{err}");
    }
}
