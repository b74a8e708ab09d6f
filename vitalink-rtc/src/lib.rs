//! Vitalink real-time video session subsystem
//!
//! This crate implements the peer-to-peer video call core of the Vitalink
//! wellness platform: a therapist and a client join a shared room through a
//! WebSocket signaling relay, negotiate a single WebRTC peer connection, and
//! exchange camera/microphone media directly. Screen sharing is an orthogonal
//! local stream rendered as primary surface with a camera picture-in-picture.
//!
//! ## Architecture
//!
//! - **`SessionController`**: top-level state machine (join / connect / leave),
//!   sole owner of every stream and the peer transport
//! - **`MediaDeviceManager`**: camera + microphone acquisition and track toggles
//! - **`ScreenShareManager`**: display-capture lifecycle
//! - **`SignalingChannel`**: per-room WebSocket relay client
//! - **`PeerConnectionManager`**: offer/answer/ICE negotiation over `webrtc`
//!
//! Platform capture (camera, microphone, display) sits behind the
//! [`MediaDevices`] trait; the subsystem itself never talks to hardware.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vitalink_rtc::{RtcConfig, SessionController, SyntheticDevices, UserId};
//! use std::sync::Arc;
//!
//! let config = RtcConfig::default();
//! let controller = SessionController::new(config, Arc::new(SyntheticDevices::new()));
//! controller.join(&session, UserId::from("client-17")).await?;
//! // ... in-call controls ...
//! controller.toggle_video();
//! controller.start_screen_share().await?;
//! controller.leave().await;
//! ```

mod config;
mod controller;
mod devices;
mod error;
pub mod logging;
mod media;
mod peer;
mod screen;
mod session;
mod signaling;
mod surface;
mod types;

pub use config::{IceConfig, LoggingConfig, MediaConfig, RtcConfig, SignalingConfig};
pub use controller::{ConnectionState, SessionController};
pub use devices::{MediaDevices, SyntheticDevices};
pub use error::{MediaKind, RtcError};
pub use media::{
    LocalStream, LocalTrack, MediaConstraints, MediaDeviceManager, TrackKind, TrackToggleState,
};
pub use peer::{NegotiationState, PeerConnectionManager};
pub use screen::{ScreenShareManager, ScreenStream};
pub use session::{SessionStatus, SessionType, VideoSession};
pub use signaling::{IceCandidatePayload, SignalingChannel, SignalingMessage, SignalingSender};
pub use surface::{RemoteStream, Slot, StreamHandle, StreamSource, Surfaces};
pub use types::{RoomId, SessionId, UserId};
