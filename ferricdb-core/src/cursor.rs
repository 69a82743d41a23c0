// src/cursor.rs
// Explicit cursor with deterministic snapshot release

use std::time::Instant;

use crate::document::Document;
use crate::error::{FerricError, Result};
use crate::transaction::SnapshotGuard;

/// A lazily evaluated result stream. The cursor pins the snapshot it was
/// opened against; the pin is released on `close()`, exhaustion or drop.
pub struct Cursor {
    inner: Box<dyn Iterator<Item = Result<Document>> + Send>,
    guard: Option<SnapshotGuard>,
    deadline: Option<Instant>,
    closed: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("deadline", &self.deadline)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) fn new(
        inner: Box<dyn Iterator<Item = Result<Document>> + Send>,
        guard: Option<SnapshotGuard>,
        deadline: Option<Instant>,
    ) -> Self {
        Cursor {
            inner,
            guard,
            deadline,
            closed: false,
        }
    }

    pub(crate) fn empty() -> Self {
        Cursor::new(Box::new(std::iter::empty()), None, None)
    }

    /// Pull the next document. Past the deadline, iteration stops
    /// producing results and reports `DeadlineExceeded`.
    pub fn next_doc(&mut self) -> Result<Option<Document>> {
        if self.closed {
            return Ok(None);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.close();
                return Err(FerricError::DeadlineExceeded);
            }
        }
        match self.inner.next() {
            Some(Ok(doc)) => Ok(Some(doc)),
            Some(Err(e)) => {
                self.close();
                Err(e)
            }
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    /// Snapshot timestamp this cursor reads at, while still pinned.
    pub fn snapshot_ts(&self) -> Option<u64> {
        self.guard.as_ref().map(|g| g.ts())
    }

    /// Release the snapshot pin and stop producing results.
    pub fn close(&mut self) {
        self.closed = true;
        self.inner = Box::new(std::iter::empty());
        self.guard = None;
    }

    /// Drain the cursor into a vector.
    pub fn collect_docs(mut self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        while let Some(doc) = self.next_doc()? {
            out.push(doc);
        }
        Ok(out)
    }

    /// Drain into the caller-facing JSON representation.
    pub fn collect_json(self) -> Result<Vec<serde_json::Value>> {
        Ok(self.collect_docs()?.iter().map(Document::to_json).collect())
    }
}

impl Iterator for Cursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_doc().transpose()
    }
}
