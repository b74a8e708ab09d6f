//! Screen share management
//!
//! Screen sharing is an orthogonal local stream: while active, the screen
//! stream takes the primary surface and the camera moves to the
//! picture-in-picture overlay. The camera stream is never stopped here; only
//! its rendering target changes, so ending a share restores it without any
//! re-acquisition.
//!
//! Remote viewing of the shared screen is not carried over the peer transport
//! in this design; only the initially negotiated camera/microphone tracks are
//! sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::devices::MediaDevices;
use crate::error::RtcError;
use crate::media::LocalTrack;
use crate::surface::{StreamHandle, StreamSource, Surfaces};

/// The display-capture stream of a session.
///
/// Carries an end-of-capture signal: browsers and operating systems expose
/// their own "stop sharing" control, which ends the capture out from under
/// the application.
pub struct ScreenStream {
    id: String,
    video: LocalTrack,
    /// System audio, when the platform grants it alongside the capture
    audio: Option<LocalTrack>,
    ended: watch::Receiver<bool>,
}

impl ScreenStream {
    pub fn new(
        id: impl Into<String>,
        video: LocalTrack,
        audio: Option<LocalTrack>,
        ended: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            video,
            audio,
            ended,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.id.clone(), StreamSource::Screen)
    }

    #[must_use]
    pub fn video(&self) -> &LocalTrack {
        &self.video
    }

    #[must_use]
    pub fn audio(&self) -> Option<&LocalTrack> {
        self.audio.as_ref()
    }

    /// Observer for the platform-level end of the capture.
    #[must_use]
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended.clone()
    }

    pub fn stop_tracks(&self) {
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }
}

/// Acquires and owns the display-capture stream.
pub struct ScreenShareManager {
    devices: Arc<dyn MediaDevices>,
    surfaces: Surfaces,
    sharing: Arc<AtomicBool>,
    stream: Arc<Mutex<Option<ScreenStream>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenShareManager {
    pub fn new(devices: Arc<dyn MediaDevices>, surfaces: Surfaces) -> Self {
        Self {
            devices,
            surfaces,
            sharing: Arc::new(AtomicBool::new(false)),
            stream: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_sharing(&self) -> bool {
        self.sharing.load(Ordering::Relaxed)
    }

    /// Start sharing. No-op when already sharing; a denial leaves the session
    /// untouched. `camera` is the handle to restore to the primary surface
    /// when the share ends, whatever surface it occupied before.
    pub async fn start(&self, camera: Option<StreamHandle>) -> Result<(), RtcError> {
        if self.is_sharing() {
            debug!("screen share already active, ignoring start");
            return Ok(());
        }

        let screen = self.devices.acquire_display().await?;
        let mut ended = screen.ended();

        info!(stream_id = %screen.id(), "screen share started");
        self.sharing.store(true, Ordering::Relaxed);

        // Screen takes the primary surface; camera drops to picture-in-picture
        self.surfaces.local_primary.attach(screen.handle());
        if let Some(cam) = camera.clone() {
            self.surfaces.local_pip.attach(cam);
        }
        *self.stream.lock() = Some(screen);

        // Route the platform's own "stop sharing" control through the same
        // teardown as a manual stop.
        let sharing = Arc::clone(&self.sharing);
        let stream = Arc::clone(&self.stream);
        let surfaces = self.surfaces.clone();
        let handle = tokio::spawn(async move {
            loop {
                if *ended.borrow() {
                    break;
                }
                if ended.changed().await.is_err() {
                    // Capture source dropped without signaling: treat as ended
                    break;
                }
            }
            debug!("screen capture ended by platform");
            finish(&sharing, &stream, &surfaces, camera);
        });
        *self.watcher.lock() = Some(handle);

        Ok(())
    }

    /// Stop sharing and restore the camera to the primary surface. Idempotent.
    pub fn stop(&self, camera: Option<StreamHandle>) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        finish(&self.sharing, &self.stream, &self.surfaces, camera);
    }
}

/// Shared teardown for manual stop and platform-initiated end.
fn finish(
    sharing: &AtomicBool,
    stream: &Mutex<Option<ScreenStream>>,
    surfaces: &Surfaces,
    camera: Option<StreamHandle>,
) {
    if let Some(screen) = stream.lock().take() {
        info!(stream_id = %screen.id(), "screen share stopped");
        screen.stop_tracks();
    }
    sharing.store(false, Ordering::Relaxed);

    surfaces.local_pip.detach();
    // The camera stream was held the whole time; only its rendering target
    // changes back.
    match camera {
        Some(cam) => surfaces.local_primary.attach(cam),
        None => surfaces.local_primary.detach(),
    }
}
