//! Platform capture device layer
//!
//! Actual camera/microphone/display capture belongs to the hosting platform
//! (and its permission prompts), not to this subsystem. [`MediaDevices`] is
//! that seam: acquisition returns ready-to-use streams whose tracks are bound
//! to WebRTC sample tracks, and each acquisition can independently fail with
//! a permission denial.
//!
//! [`SyntheticDevices`] is the in-tree implementation: it pumps generated
//! samples at capture cadence and supports scripted denials, which is what
//! the demo binary and the test suite run against.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::{MediaKind, RtcError};
use crate::media::{LocalStream, LocalTrack, MediaConstraints, TrackKind};
use crate::screen::ScreenStream;

/// Audio frame cadence (Opus)
const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);
/// Video frame cadence (~30 fps)
const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Platform capture collaborator.
///
/// Implementations perform the actual device access and permission prompting.
/// Camera and microphone are acquired together in one request; display
/// capture is a separate, independently deniable request.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire camera + microphone as a single local stream.
    async fn acquire_stream(&self, constraints: &MediaConstraints)
        -> Result<LocalStream, RtcError>;

    /// Acquire a display-capture stream.
    async fn acquire_display(&self) -> Result<ScreenStream, RtcError>;
}

/// Sample-generating device layer.
///
/// Stands in for hardware capture: every acquired track is fed by a pump task
/// emitting blank samples at capture cadence, gated on the track's enabled
/// flag and terminated by its stop latch. Denials can be scripted to exercise
/// the permission-retry paths.
#[derive(Default)]
pub struct SyntheticDevices {
    deny_stream: AtomicU32,
    deny_display: AtomicU32,
    stream_acquisitions: AtomicU32,
    display_acquisitions: AtomicU32,
    screen_end: Mutex<Option<watch::Sender<bool>>>,
}

impl SyntheticDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny the next `count` camera/microphone acquisitions.
    pub fn deny_next_stream(&self, count: u32) {
        self.deny_stream.store(count, Ordering::Relaxed);
    }

    /// Deny the next `count` display acquisitions.
    pub fn deny_next_display(&self, count: u32) {
        self.deny_display.store(count, Ordering::Relaxed);
    }

    /// How many camera/microphone acquisitions have succeeded.
    #[must_use]
    pub fn stream_acquisitions(&self) -> u32 {
        self.stream_acquisitions.load(Ordering::Relaxed)
    }

    /// How many display acquisitions have succeeded.
    #[must_use]
    pub fn display_acquisitions(&self) -> u32 {
        self.display_acquisitions.load(Ordering::Relaxed)
    }

    /// Simulate the OS-level "stop sharing" control ending the capture.
    pub fn end_screen_capture(&self) {
        if let Some(tx) = self.screen_end.lock().as_ref() {
            let _ = tx.send(true);
        }
    }

    fn take_denial(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn make_track(kind: TrackKind, stream_id: &str) -> LocalTrack {
        let (mime, label) = match kind {
            TrackKind::Audio => (MIME_TYPE_OPUS, "audio"),
            TrackKind::Video => (MIME_TYPE_VP8, "video"),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                ..Default::default()
            },
            format!("{label}-{}", nanoid::nanoid!(6)),
            stream_id.to_string(),
        ));
        let local = LocalTrack::new(kind, track);
        spawn_pump(&local, kind);
        local
    }
}

/// Feed blank samples into the track at capture cadence.
fn spawn_pump(track: &LocalTrack, kind: TrackKind) {
    let sample_track = track.sample_track();
    let enabled: Arc<AtomicBool> = track.enabled_flag();
    let stopped: Arc<AtomicBool> = track.stopped_flag();
    let (interval, payload_len) = match kind {
        TrackKind::Audio => (AUDIO_FRAME_INTERVAL, 160),
        TrackKind::Video => (VIDEO_FRAME_INTERVAL, 1200),
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if stopped.load(Ordering::Relaxed) {
                break;
            }
            // Disabled tracks emit nothing but keep the capture warm
            if !enabled.load(Ordering::Relaxed) {
                continue;
            }
            let sample = Sample {
                data: Bytes::from(vec![0u8; payload_len]),
                duration: interval,
                ..Default::default()
            };
            if let Err(e) = sample_track.write_sample(&sample).await {
                debug!(error = %e, "sample write failed, pump continues");
            }
        }
    });
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire_stream(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<LocalStream, RtcError> {
        if Self::take_denial(&self.deny_stream) {
            debug!("scripted denial of camera/microphone acquisition");
            return Err(RtcError::PermissionDenied {
                kind: MediaKind::Camera,
            });
        }

        debug!(
            width = constraints.ideal_width,
            height = constraints.ideal_height,
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "synthesizing camera/microphone stream"
        );

        let stream_id = format!("cam-{}", nanoid::nanoid!(8));
        let audio = Self::make_track(TrackKind::Audio, &stream_id);
        let video = Self::make_track(TrackKind::Video, &stream_id);

        self.stream_acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(LocalStream::new(stream_id, audio, video))
    }

    async fn acquire_display(&self) -> Result<ScreenStream, RtcError> {
        if Self::take_denial(&self.deny_display) {
            debug!("scripted denial of display acquisition");
            return Err(RtcError::PermissionDenied {
                kind: MediaKind::Screen,
            });
        }

        let stream_id = format!("screen-{}", nanoid::nanoid!(8));
        let video = Self::make_track(TrackKind::Video, &stream_id);
        let audio = Self::make_track(TrackKind::Audio, &stream_id);

        let (ended_tx, ended_rx) = watch::channel(false);
        *self.screen_end.lock() = Some(ended_tx);

        self.display_acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(ScreenStream::new(stream_id, video, Some(audio), ended_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_denial_then_grant() {
        let devices = SyntheticDevices::new();
        devices.deny_next_stream(1);

        let denied = devices.acquire_stream(&MediaConstraints::default()).await;
        assert!(matches!(
            denied,
            Err(RtcError::PermissionDenied {
                kind: MediaKind::Camera
            })
        ));

        let granted = devices.acquire_stream(&MediaConstraints::default()).await;
        assert!(granted.is_ok());
        assert_eq!(devices.stream_acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_display_denial_independent_of_stream() {
        let devices = SyntheticDevices::new();
        devices.deny_next_display(1);

        assert!(devices
            .acquire_stream(&MediaConstraints::default())
            .await
            .is_ok());
        assert!(matches!(
            devices.acquire_display().await,
            Err(RtcError::PermissionDenied {
                kind: MediaKind::Screen
            })
        ));
    }

    #[tokio::test]
    async fn test_screen_end_signal_fires() {
        let devices = SyntheticDevices::new();
        let screen = devices.acquire_display().await.unwrap();
        let mut ended = screen.ended();

        devices.end_screen_capture();
        ended.changed().await.unwrap();
        assert!(*ended.borrow());
    }
}
