//! Export status machine.
//!
//! ```text
//! idle → loading → rendering → encoding → (uploading) → complete
//!            └──────────┴───────────┴──────────┴──────→ error
//! ```
//!
//! Progress never decreases within one export, including across whole-run
//! retries. Terminal states accept no further changes.

use bytes::Bytes;
use serde::Serialize;

/// Coarse export phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    #[default]
    Idle,
    Loading,
    Rendering,
    Encoding,
    Uploading,
    Complete,
    Error,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Complete | ExportStatus::Error)
    }

    /// Whether the forward state machine allows `self → next`.
    pub fn can_transition_to(self, next: ExportStatus) -> bool {
        use ExportStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Error {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Rendering)
                | (Rendering, Encoding)
                | (Encoding, Uploading)
                | (Encoding, Complete)
                | (Uploading, Complete)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportStatus::Idle => "idle",
            ExportStatus::Loading => "loading",
            ExportStatus::Rendering => "rendering",
            ExportStatus::Encoding => "encoding",
            ExportStatus::Uploading => "uploading",
            ExportStatus::Complete => "complete",
            ExportStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The finished container, always available locally.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    /// Container bytes.
    #[serde(skip)]
    pub bytes: Bytes,

    /// Suggested download name.
    pub file_name: String,

    /// MIME type of `bytes`.
    pub mime_type: String,

    pub size_bytes: u64,
}

impl Artifact {
    pub fn mp4(file_name: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            bytes,
            file_name: file_name.into(),
            mime_type: "video/mp4".to_string(),
        }
    }
}

/// Result references handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub artifact: Artifact,

    /// Durable reference when a storage key was supplied and upload worked.
    pub remote_ref: Option<String>,
}

/// Snapshot of an export published to subscribers.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ExportState {
    pub status: ExportStatus,

    /// 0..=100.
    pub progress: u8,

    /// Non-fatal notice (for example a silent export).
    pub warning: Option<String>,

    /// Human-readable failure message.
    pub error: Option<String>,

    pub output: Option<ExportOutput>,

    /// 1-based attempt number; 0 before the first attempt.
    pub attempt: u32,
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid export transition {from} -> {to}")]
    InvalidTransition { from: ExportStatus, to: ExportStatus },

    #[error("export already finished with status {status}")]
    Finished { status: ExportStatus },
}

impl ExportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, raising progress to at least `progress`.
    pub fn advance(&mut self, next: ExportStatus, progress: u8) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(self.rejection(next));
        }
        if next == ExportStatus::Loading && self.attempt == 0 {
            self.attempt = 1;
        }
        self.status = next;
        self.bump_progress(progress);
        Ok(())
    }

    /// Raise progress without changing status. Lower values are ignored.
    pub fn set_progress(&mut self, progress: u8) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Finished {
                status: self.status,
            });
        }
        self.bump_progress(progress);
        Ok(())
    }

    /// Start another whole-run attempt. Progress is kept as is.
    pub fn retry(&mut self) -> Result<(), StateError> {
        if self.is_terminal() || self.status == ExportStatus::Idle {
            return Err(self.rejection(ExportStatus::Loading));
        }
        self.status = ExportStatus::Loading;
        self.attempt += 1;
        Ok(())
    }

    /// Record a non-fatal notice. Repeated notices are joined.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        match &mut self.warning {
            Some(existing) if existing.contains(&message) => {}
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&message);
            }
            None => self.warning = Some(message),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), StateError> {
        if !self.status.can_transition_to(ExportStatus::Error) {
            return Err(self.rejection(ExportStatus::Error));
        }
        self.status = ExportStatus::Error;
        self.error = Some(message.into());
        self.output = None;
        Ok(())
    }

    pub fn complete(&mut self, output: ExportOutput) -> Result<(), StateError> {
        if !self.status.can_transition_to(ExportStatus::Complete) {
            return Err(self.rejection(ExportStatus::Complete));
        }
        self.status = ExportStatus::Complete;
        self.progress = 100;
        self.output = Some(output);
        Ok(())
    }

    fn bump_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    fn rejection(&self, to: ExportStatus) -> StateError {
        if self.is_terminal() {
            StateError::Finished {
                status: self.status,
            }
        } else {
            StateError::InvalidTransition {
                from: self.status,
                to,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> ExportOutput {
        ExportOutput {
            artifact: Artifact::mp4("out.mp4", Bytes::from_static(b"mp4")),
            remote_ref: None,
        }
    }

    #[test]
    fn test_happy_path_without_upload() {
        let mut state = ExportState::new();
        state.advance(ExportStatus::Loading, 0).unwrap();
        state.advance(ExportStatus::Rendering, 15).unwrap();
        state.advance(ExportStatus::Encoding, 90).unwrap();
        state.complete(output()).unwrap();
        assert_eq!(state.status, ExportStatus::Complete);
        assert_eq!(state.progress, 100);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.output.unwrap().artifact.size_bytes, 3);
    }

    #[test]
    fn test_skipping_phases_rejected() {
        let mut state = ExportState::new();
        let err = state.advance(ExportStatus::Encoding, 90).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: ExportStatus::Idle,
                to: ExportStatus::Encoding
            }
        );
    }

    #[test]
    fn test_error_reachable_from_any_active_state() {
        for status in [
            ExportStatus::Idle,
            ExportStatus::Loading,
            ExportStatus::Rendering,
            ExportStatus::Encoding,
            ExportStatus::Uploading,
        ] {
            assert!(status.can_transition_to(ExportStatus::Error));
        }
        assert!(!ExportStatus::Complete.can_transition_to(ExportStatus::Error));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut state = ExportState::new();
        state.fail("boom").unwrap();
        assert!(matches!(
            state.advance(ExportStatus::Loading, 0),
            Err(StateError::Finished { .. })
        ));
        assert!(state.set_progress(50).is_err());
        assert!(state.retry().is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut state = ExportState::new();
        state.advance(ExportStatus::Loading, 10).unwrap();
        state.set_progress(5).unwrap();
        assert_eq!(state.progress, 10);
        state.set_progress(250).unwrap();
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn test_retry_keeps_progress() {
        let mut state = ExportState::new();
        state.advance(ExportStatus::Loading, 0).unwrap();
        state.advance(ExportStatus::Rendering, 40).unwrap();
        state.retry().unwrap();
        assert_eq!(state.status, ExportStatus::Loading);
        assert_eq!(state.progress, 40);
        assert_eq!(state.attempt, 2);
        state.advance(ExportStatus::Rendering, 15).unwrap();
        assert_eq!(state.progress, 40);
    }

    #[test]
    fn test_warnings_are_joined_once() {
        let mut state = ExportState::new();
        state.warn("Audio encoding unsupported; exported without sound");
        state.warn("Audio encoding unsupported; exported without sound");
        state.warn("Skipped 1 image in scene 2");
        assert_eq!(
            state.warning.as_deref(),
            Some("Audio encoding unsupported; exported without sound; Skipped 1 image in scene 2")
        );
    }

    #[test]
    fn test_state_serializes_without_bytes() {
        let mut state = ExportState::new();
        state.advance(ExportStatus::Loading, 0).unwrap();
        state.advance(ExportStatus::Rendering, 15).unwrap();
        state.advance(ExportStatus::Encoding, 90).unwrap();
        state.complete(output()).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "complete");
        assert_eq!(json["output"]["artifact"]["size_bytes"], 3);
        assert!(json["output"]["artifact"].get("bytes").is_none());
    }
}
