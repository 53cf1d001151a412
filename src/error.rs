//! Error types for the client core.
//!
//! Every variant is recoverable: the coordinator turns transport failures into
//! an apology turn, capture and playback failures into user-visible notices.

/// Microphone capture failures.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone permission denied or no usable input device: {0}")]
    Permission(String),

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("No audio recorded.")]
    Empty,
}

/// Backend round trip failures. No retry is attempted for any of them.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("turn rejected before sending: {0}")]
    Rejected(&'static str),
}

/// Reply clip playback failures.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("No audio available for playback.")]
    Unavailable,

    #[error("reply audio could not be decoded: {0}")]
    Decode(String),

    #[error("audio output failed: {0}")]
    Device(String),
}
