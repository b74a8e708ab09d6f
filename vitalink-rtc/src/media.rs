//! Local media stream management
//!
//! This module handles:
//! - Camera + microphone acquisition through the platform device layer
//! - Track enable/disable toggles (mute, camera off) without releasing hardware
//! - The single-ownership local stream handle and its teardown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::MediaConfig;
use crate::devices::MediaDevices;
use crate::error::RtcError;
use crate::surface::{StreamHandle, StreamSource};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Constraints for a single camera + microphone acquisition.
///
/// Camera and microphone are requested together; there is no audio-only
/// fallback in this design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::lobby(&MediaConfig::default())
    }
}

impl MediaConstraints {
    /// Pre-call preview quality.
    #[must_use]
    pub fn lobby(config: &MediaConfig) -> Self {
        Self {
            ideal_width: config.lobby_width,
            ideal_height: config.lobby_height,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
        }
    }

    /// Higher quality used once actually in-call.
    #[must_use]
    pub fn in_call(config: &MediaConfig) -> Self {
        Self {
            ideal_width: config.call_width,
            ideal_height: config.call_height,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
        }
    }
}

/// UI-facing reflection of the local track flags.
///
/// Assembled on read from the tracks themselves (and the screen share
/// manager); never stored independently, so it cannot diverge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackToggleState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
}

/// One local capture track bound to a WebRTC sample track.
///
/// The `enabled` flag IS the track's enabled state: the sample pump checks it
/// before writing, so flipping it mutes/blanks output without stopping the
/// capture (no permission re-prompt on unmute).
#[derive(Clone, Debug)]
pub struct LocalTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip the enabled flag, returning the new value.
    pub fn toggle(&self) -> bool {
        // fetch_xor returns the previous value
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Stop the capture permanently. The sample pump observes this and exits.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    pub(crate) fn enabled_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.enabled)
    }

    pub(crate) fn stopped_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

/// The single local camera + microphone stream of a session
#[derive(Debug)]
pub struct LocalStream {
    id: String,
    audio: LocalTrack,
    video: LocalTrack,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, audio: LocalTrack, video: LocalTrack) -> Self {
        Self {
            id: id.into(),
            audio,
            video,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.id.clone(), StreamSource::Camera)
    }

    #[must_use]
    pub fn audio(&self) -> &LocalTrack {
        &self.audio
    }

    #[must_use]
    pub fn video(&self) -> &LocalTrack {
        &self.video
    }

    /// The tracks in the form the peer connection attaches.
    #[must_use]
    pub fn transport_tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        vec![
            self.audio.sample_track() as Arc<dyn TrackLocal + Send + Sync>,
            self.video.sample_track() as Arc<dyn TrackLocal + Send + Sync>,
        ]
    }

    pub fn stop_all(&self) {
        self.audio.stop();
        self.video.stop();
    }
}

/// Acquires and owns the local camera/microphone stream.
///
/// Only the session controller releases the stream; everything else receives
/// handles or track references.
pub struct MediaDeviceManager {
    devices: Arc<dyn MediaDevices>,
    stream: RwLock<Option<Arc<LocalStream>>>,
}

impl MediaDeviceManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: RwLock::new(None),
        }
    }

    /// Request camera and microphone in a single acquisition.
    ///
    /// Returns the already-held stream when one exists; a retry after a denial
    /// therefore never double-acquires. On success all tracks start enabled.
    pub async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<LocalStream>, RtcError> {
        if let Some(stream) = self.stream.read().clone() {
            debug!(stream_id = %stream.id(), "local stream already held");
            return Ok(stream);
        }

        let stream = Arc::new(self.devices.acquire_stream(constraints).await?);
        stream.audio().set_enabled(true);
        stream.video().set_enabled(true);

        info!(
            stream_id = %stream.id(),
            width = constraints.ideal_width,
            height = constraints.ideal_height,
            "acquired local media stream"
        );

        *self.stream.write() = Some(Arc::clone(&stream));
        Ok(stream)
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<LocalStream>> {
        self.stream.read().clone()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.stream.read().is_some()
    }

    /// Flip the camera track. No-op (returns false) when no stream is held.
    pub fn toggle_video(&self) -> bool {
        match self.stream.read().as_ref() {
            Some(stream) => {
                let enabled = stream.video().toggle();
                debug!(enabled, "toggled video track");
                enabled
            }
            None => false,
        }
    }

    /// Flip the microphone track. No-op (returns false) when no stream is held.
    pub fn toggle_audio(&self) -> bool {
        match self.stream.read().as_ref() {
            Some(stream) => {
                let enabled = stream.audio().toggle();
                debug!(enabled, "toggled audio track");
                enabled
            }
            None => false,
        }
    }

    #[must_use]
    pub fn video_enabled(&self) -> bool {
        self.stream
            .read()
            .as_ref()
            .is_some_and(|s| s.video().is_enabled())
    }

    #[must_use]
    pub fn audio_enabled(&self) -> bool {
        self.stream
            .read()
            .as_ref()
            .is_some_and(|s| s.audio().is_enabled())
    }

    /// Stop every track and drop the stream. Idempotent.
    pub fn release(&self) {
        if let Some(stream) = self.stream.write().take() {
            info!(stream_id = %stream.id(), "releasing local media stream");
            stream.stop_all();
        }
    }
}
