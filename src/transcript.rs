//! Ordered record of what an install or uninstall run did.
//!
//! Flows append to the transcript as they go and callers print it at the
//! end, including after a failure, so the operator always sees which steps
//! completed.

use serde::Serialize;
use std::fmt;

/// Kind of transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A completed step.
    Step,
    /// A non-fatal problem.
    Warning,
    /// The error that stopped the run.
    Failure,
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    /// Entry kind.
    pub kind: EntryKind,
    /// Human readable message.
    pub message: String,
}

/// Ordered list of steps and warnings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed step.
    pub fn step(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.push(EntryKind::Step, message);
    }

    /// Record a warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.push(EntryKind::Warning, message);
    }

    /// Record the failure that ended the run.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.push(EntryKind::Failure, message);
    }

    fn push(&mut self, kind: EntryKind, message: String) {
        self.entries.push(TranscriptEntry { kind, message });
    }

    /// All entries in order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Warning messages only.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Warning)
            .map(|e| e.message.as_str())
    }

    /// Whether a failure was recorded.
    pub fn has_failure(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::Failure)
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let prefix = match entry.kind {
                EntryKind::Step => "  [ok]",
                EntryKind::Warning => "[warn]",
                EntryKind::Failure => "[fail]",
            };
            writeln!(f, "{} {}", prefix, entry.message)?;
        }
        Ok(())
    }
}
