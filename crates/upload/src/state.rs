use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Orchestrator state of one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Init,
    SinglePut,
    CreatingMultipart,
    UploadingParts,
    Completing,
    Aborting,
    Done,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the orchestrator may move from `self` to `next`.
    ///
    /// Once a remote multipart upload exists, failure always goes through
    /// `Aborting`.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Init, SinglePut | CreatingMultipart | Failed)
                | (SinglePut, Done | Failed)
                | (CreatingMultipart, UploadingParts | Failed)
                | (UploadingParts, Completing | Aborting)
                | (Completing, Done | Aborting)
                | (Aborting, Failed)
        )
    }
}

/// Snapshot of an upload's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub state: UploadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub total_parts: usize,
    pub parts_completed: usize,
    pub total_bytes: u64,
    pub bytes_uploaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tracks one upload (thread-safe).
pub struct UploadTracker {
    inner: RwLock<TrackerInner>,
}

struct TrackerInner {
    state: UploadState,
    upload_id: Option<String>,
    total_parts: usize,
    parts_completed: usize,
    total_bytes: u64,
    bytes_uploaded: u64,
    error: Option<String>,
    started_at: Instant,
    finished_at: Option<Instant>,
}

impl Default for UploadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                state: UploadState::Init,
                upload_id: None,
                total_parts: 0,
                parts_completed: 0,
                total_bytes: 0,
                bytes_uploaded: 0,
                error: None,
                started_at: Instant::now(),
                finished_at: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> UploadState {
        self.read().state
    }

    /// Moves to `next`. Returns `false` and keeps the current state if the
    /// move is not allowed.
    pub fn transition(&self, next: UploadState) -> bool {
        let mut s = self.write();
        if !s.state.can_transition_to(next) {
            warn!(from = ?s.state, to = ?next, "ignoring invalid upload state transition");
            return false;
        }
        debug!(upload_id = ?s.upload_id, from = ?s.state, to = ?next, "upload state changed");
        s.state = next;
        if next.is_terminal() {
            s.finished_at = Some(Instant::now());
        }
        true
    }

    /// Records the size of the upload once it has been partitioned.
    pub fn set_totals(&self, total_parts: usize, total_bytes: u64) {
        let mut s = self.write();
        s.total_parts = total_parts;
        s.total_bytes = total_bytes;
    }

    pub fn set_upload_id(&self, upload_id: &str) {
        self.write().upload_id = Some(upload_id.to_string());
    }

    pub fn part_uploaded(&self, bytes: u64) {
        let mut s = self.write();
        s.parts_completed += 1;
        s.bytes_uploaded += bytes;
    }

    /// Moves to `Failed` and records the error message.
    pub fn fail(&self, error: &str) {
        if self.transition(UploadState::Failed) {
            self.write().error = Some(error.to_string());
        }
    }

    pub fn upload_id(&self) -> Option<String> {
        self.read().upload_id.clone()
    }

    /// Time from creation until the upload finished, or until now.
    pub fn elapsed(&self) -> std::time::Duration {
        let s = self.read();
        s.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(s.started_at)
    }

    pub fn progress(&self) -> UploadProgress {
        let s = self.read();
        UploadProgress {
            state: s.state,
            upload_id: s.upload_id.clone(),
            total_parts: s.total_parts,
            parts_completed: s.parts_completed,
            total_bytes: s.total_bytes,
            bytes_uploaded: s.bytes_uploaded,
            error: s.error.clone(),
        }
    }
}
