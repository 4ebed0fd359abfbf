//! Append-only JSONL transcripts.
//!
//! Each session gets a `<session_id>.jsonl` file under the transcripts
//! directory; one message per line, appended only after a step completes.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cw_domain::error::{Error, Result};
use cw_domain::message::Message;

/// A single transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub timestamp: String,
    pub message: Message,
}

/// Writes append-only JSONL transcript files.
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Append messages to a session's transcript.
    pub fn append(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.base_dir)?;

        let mut buf = String::new();
        for message in messages {
            let line = TranscriptLine {
                timestamp: Utc::now().to_rfc3339(),
                message: message.clone(),
            };
            buf.push_str(
                &serde_json::to_string(&line)
                    .map_err(|e| Error::Internal(format!("serializing transcript line: {e}")))?,
            );
            buf.push('\n');
        }

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(session_id))?;
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Read back a transcript, skipping malformed lines.
    pub fn read(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        let mut messages = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptLine>(line) {
                Ok(tl) => messages.push(tl.message),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed transcript line");
                }
            }
        }
        Ok(messages)
    }

    /// Remove a session's transcript file (session reset).
    pub fn clear(&self, session_id: &str) -> Result<()> {
        let path = self.path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}
