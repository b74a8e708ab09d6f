//! Error types for the video session subsystem
//!
//! Device and permission errors are user-visible and recoverable (the UI
//! offers a retry); negotiation-protocol errors are logged and absorbed, the
//! user only ever sees connection state.

use std::fmt;
use thiserror::Error;

/// Which piece of capture hardware an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Camera,
    Microphone,
    Screen,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::Microphone => write!(f, "microphone"),
            Self::Screen => write!(f, "screen capture"),
        }
    }
}

/// Error type for the video session core.
///
/// Variants are cloneable so the controller can retain the last media failure
/// for the retry affordance without giving up ownership.
#[derive(Debug, Clone, Error)]
pub enum RtcError {
    #[error("{kind} permission denied")]
    PermissionDenied { kind: MediaKind },

    #[error("{kind} unavailable: {reason}")]
    DeviceUnavailable { kind: MediaKind, reason: String },

    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("stale negotiation message: {0}")]
    NegotiationStale(String),

    #[error("teardown failure: {0}")]
    Teardown(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RtcError {
    /// Whether the user can recover by retrying without leaving the session.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::DeviceUnavailable { .. }
        )
    }
}

impl From<webrtc::Error> for RtcError {
    fn from(err: webrtc::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
