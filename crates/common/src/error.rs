//! Error types shared across Storyreel crates.

use std::path::PathBuf;

/// Top-level error type for Storyreel operations.
#[derive(Debug, thiserror::Error)]
pub enum StoryreelError {
    /// Required encoding primitives are missing from the runtime.
    #[error("Capability error: {message}")]
    Capability { message: String },

    /// A scene's primary media (video clip or narration) could not be loaded.
    #[error("Scene {scene}: {message}")]
    Asset {
        scene: u32,
        message: String,
        retryable: bool,
    },

    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Timed out after {secs:.1}s while {operation}")]
    Timeout { operation: String, secs: f64 },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    /// Finalization produced no video samples even though no error fired.
    #[error("Export produced no output: {message}")]
    EmptyOutput { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Export cancelled")]
    Cancelled,

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StoryreelError.
pub type StoryreelResult<T> = Result<T, StoryreelError>;

impl StoryreelError {
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability {
            message: msg.into(),
        }
    }

    pub fn asset(scene: u32, msg: impl Into<String>) -> Self {
        Self::Asset {
            scene,
            message: msg.into(),
            retryable: true,
        }
    }

    /// Attribute `source` to a scene, keeping its retry classification.
    pub fn for_scene(scene: u32, what: &str, source: StoryreelError) -> Self {
        match source {
            Self::Cancelled => Self::Cancelled,
            Self::Asset { .. } => source,
            other => Self::Asset {
                scene,
                retryable: other.is_retryable(),
                message: format!("{what}: {other}"),
            },
        }
    }

    pub fn fetch(url: impl Into<String>, status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            status,
            message: msg.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, limit: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs: limit.as_secs_f64(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn empty_output(msg: impl Into<String>) -> Self {
        Self::EmptyOutput {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether a whole-run retry may succeed where this attempt failed.
    ///
    /// Capability gaps, bad input and user cancellation are deterministic,
    /// so retrying them only wastes time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Capability { .. }
            | Self::InvalidInput { .. }
            | Self::Cancelled
            | Self::Config { .. }
            | Self::FileNotFound { .. }
            | Self::Unsupported { .. }
            | Self::Json(_) => false,
            Self::Fetch { status, .. } => !matches!(status, Some(400..=499)),
            Self::Asset { retryable, .. } => *retryable,
            Self::Timeout { .. }
            | Self::Encoder { .. }
            | Self::Mux { .. }
            | Self::EmptyOutput { .. }
            | Self::Storage { .. }
            | Self::Io(_)
            | Self::Other(_) => true,
        }
    }

    /// Whether this error is the result of a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Single human-readable message for end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::Capability { message } => format!(
                "{message}. This device cannot encode video here; try a desktop machine \
                 with hardware or GStreamer H.264 support."
            ),
            Self::Timeout { .. } => {
                format!("{self}. Check the network connection and try again.")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capability_errors_are_not_retried() {
        assert!(!StoryreelError::capability("no H.264 encoder").is_retryable());
        assert!(!StoryreelError::Cancelled.is_retryable());
        assert!(!StoryreelError::invalid_input("no scenes").is_retryable());
    }

    #[test]
    fn test_runtime_errors_are_retried() {
        assert!(StoryreelError::encoder("callback error").is_retryable());
        assert!(StoryreelError::empty_output("no video chunks").is_retryable());
        assert!(StoryreelError::timeout("fetching", Duration::from_secs(30)).is_retryable());
        assert!(StoryreelError::asset(2, "video failed").is_retryable());
    }

    #[test]
    fn test_client_fetch_errors_are_not_retried() {
        let not_found = StoryreelError::fetch("https://x/a.mp4", Some(404), "HTTP 404");
        let server = StoryreelError::fetch("https://x/a.mp4", Some(503), "HTTP 503");
        let network = StoryreelError::fetch("https://x/a.mp4", None, "connection reset");
        assert!(!not_found.is_retryable());
        assert!(server.is_retryable());
        assert!(network.is_retryable());
    }

    #[test]
    fn test_asset_message_names_scene() {
        let err = StoryreelError::asset(3, "video fetch failed: HTTP 404");
        assert_eq!(err.to_string(), "Scene 3: video fetch failed: HTTP 404");
    }

    #[test]
    fn test_for_scene_keeps_retry_classification() {
        let not_found = StoryreelError::fetch("https://x/a.mp4", Some(404), "HTTP 404");
        let err = StoryreelError::for_scene(4, "video could not be loaded", not_found);
        assert!(err.to_string().starts_with("Scene 4: video could not be loaded"));
        assert!(!err.is_retryable());

        let cancelled = StoryreelError::for_scene(4, "video", StoryreelError::Cancelled);
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_capability_message_carries_guidance() {
        let msg = StoryreelError::capability("No H.264 encoder available").user_message();
        assert!(msg.starts_with("No H.264 encoder available"));
        assert!(msg.contains("desktop"));
    }
}
