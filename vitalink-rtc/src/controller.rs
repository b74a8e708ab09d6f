//! Session lifecycle control
//!
//! The controller is the top of the subsystem: it owns the signaling channel,
//! the peer connection, and every local stream, and it is the only component
//! allowed to release any of them. UI state is derived exclusively from the
//! `ConnectionState` it publishes plus the participant counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{IceConfig, RtcConfig};
use crate::devices::MediaDevices;
use crate::error::RtcError;
use crate::media::{MediaConstraints, MediaDeviceManager, TrackToggleState};
use crate::peer::{NegotiationState, PeerConnectionManager};
use crate::screen::ScreenShareManager;
use crate::session::VideoSession;
use crate::signaling::{SignalingChannel, SignalingMessage, SignalingSender};
use crate::surface::Surfaces;
use crate::types::{RoomId, UserId};

/// Connection state of the local participant. Single source of truth for the
/// session UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Identity of the joined room, shared with the signaling event loop
#[derive(Clone)]
struct ActiveSession {
    room_id: RoomId,
    user_id: UserId,
    sender: SignalingSender,
}

/// The pieces the signaling event loop drives, detached from the controller
/// so the loop can run as its own task.
struct SessionRuntime {
    ice: IceConfig,
    media: Arc<MediaDeviceManager>,
    surfaces: Surfaces,
    participants_tx: Arc<watch::Sender<u32>>,
    peer: Arc<tokio::sync::RwLock<Option<Arc<PeerConnectionManager>>>>,
    active: ActiveSession,
}

impl SessionRuntime {
    /// Get the peer manager, creating it (without a transport yet) on demand.
    async fn ensure_peer(&self) -> Arc<PeerConnectionManager> {
        let mut guard = self.peer.write().await;
        if let Some(peer) = guard.as_ref() {
            return Arc::clone(peer);
        }
        let peer = Arc::new(PeerConnectionManager::new(
            self.active.room_id.clone(),
            self.active.user_id.clone(),
            &self.ice,
            self.active.sender.clone(),
            self.surfaces.remote.clone(),
        ));
        *guard = Some(Arc::clone(&peer));
        peer
    }

    fn participants(&self) -> u32 {
        *self.participants_tx.borrow()
    }
}

/// Top-level state machine coordinating signaling, media, screen share and
/// the peer connection for one session at a time.
pub struct SessionController {
    config: RtcConfig,
    media: Arc<MediaDeviceManager>,
    screen: ScreenShareManager,
    surfaces: Surfaces,
    state_tx: watch::Sender<ConnectionState>,
    participants_tx: Arc<watch::Sender<u32>>,
    duration_tx: Arc<watch::Sender<Duration>>,
    connected_at: Arc<Mutex<Option<Instant>>>,
    peer: Arc<tokio::sync::RwLock<Option<Arc<PeerConnectionManager>>>>,
    channel: Mutex<Option<SignalingChannel>>,
    active: Mutex<Option<ActiveSession>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    media_error: Mutex<Option<RtcError>>,
}

impl SessionController {
    pub fn new(config: RtcConfig, devices: Arc<dyn MediaDevices>) -> Self {
        let surfaces = Surfaces::new();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (participants_tx, _) = watch::channel(0);
        let (duration_tx, _) = watch::channel(Duration::ZERO);

        Self {
            media: Arc::new(MediaDeviceManager::new(Arc::clone(&devices))),
            screen: ScreenShareManager::new(devices, surfaces.clone()),
            surfaces,
            config,
            state_tx,
            participants_tx: Arc::new(participants_tx),
            duration_tx: Arc::new(duration_tx),
            connected_at: Arc::new(Mutex::new(None)),
            peer: Arc::new(tokio::sync::RwLock::new(None)),
            channel: Mutex::new(None),
            active: Mutex::new(None),
            event_task: Mutex::new(None),
            timer_task: Mutex::new(None),
            media_error: Mutex::new(None),
        }
    }

    /// Join a session: open signaling and acquire local media in parallel.
    ///
    /// A media denial does not block the join — the session proceeds with
    /// video/audio disabled and [`Self::retry_media`] available, so the remote
    /// peer is not left waiting. A signaling failure ends the attempt.
    pub async fn join(&self, session: &VideoSession, user_id: UserId) -> Result<(), RtcError> {
        if self.connection_state() != ConnectionState::Disconnected {
            warn!("join requested while already in a session, ignoring");
            return Ok(());
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        let room_id = session.room_id();
        info!(
            session_id = %session.id,
            room_id = %room_id,
            user_id = %user_id,
            "joining video session"
        );

        let constraints = MediaConstraints::in_call(&self.config.media);
        let (signaling_result, media_result) = tokio::join!(
            SignalingChannel::connect(&self.config.signaling, room_id.clone(), user_id.clone()),
            self.media.acquire(&constraints),
        );

        match media_result {
            Ok(stream) => {
                self.surfaces.local_primary.attach(stream.handle());
                *self.media_error.lock() = None;
            }
            Err(e) => {
                warn!(error = %e, "media acquisition failed, session continues without camera");
                *self.media_error.lock() = Some(e);
            }
        }

        let (channel, events) = match signaling_result {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "signaling connection failed");
                self.media.release();
                self.surfaces.clear_all();
                *self.media_error.lock() = None;
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let active = ActiveSession {
            room_id,
            user_id,
            sender: channel.sender(),
        };
        *self.active.lock() = Some(active.clone());
        *self.channel.lock() = Some(channel);

        self.participants_tx.send_replace(1);
        self.state_tx.send_replace(ConnectionState::Connected);
        self.start_timer();

        let runtime = SessionRuntime {
            ice: self.config.ice.clone(),
            media: Arc::clone(&self.media),
            surfaces: self.surfaces.clone(),
            participants_tx: Arc::clone(&self.participants_tx),
            peer: Arc::clone(&self.peer),
            active,
        };
        let handle = tokio::spawn(run_events(runtime, events));
        *self.event_task.lock() = Some(handle);

        Ok(())
    }

    /// Leave the session. Teardown order matters: signaling first, so no
    /// inbound negotiation message can revive a connection mid-teardown; then
    /// the peer transport, screen share, and finally the capture devices.
    /// Idempotent, safe at any point of the lifecycle, never raises.
    pub async fn leave(&self) {
        info!("leaving session");

        if let Some(channel) = self.channel.lock().take() {
            channel.disconnect();
        }
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        *self.active.lock() = None;

        if let Some(peer) = self.peer.write().await.take() {
            peer.close().await;
        }

        self.screen.stop(None);
        self.media.release();

        self.surfaces.clear_all();
        *self.media_error.lock() = None;
        self.stop_timer();
        self.participants_tx.send_replace(0);
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Re-run media acquisition after a denial, without leaving the room.
    pub async fn retry_media(&self) -> Result<(), RtcError> {
        let constraints = MediaConstraints::in_call(&self.config.media);
        match self.media.acquire(&constraints).await {
            Ok(stream) => {
                *self.media_error.lock() = None;
                if self.screen.is_sharing() {
                    self.surfaces.local_pip.attach(stream.handle());
                } else {
                    self.surfaces.local_primary.attach(stream.handle());
                }
                info!("camera live after retry");
                Ok(())
            }
            Err(e) => {
                *self.media_error.lock() = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Local-only repair for rendering glitches: detach and re-attach the held
    /// camera stream. No renegotiation, no re-acquisition.
    pub fn refresh_camera(&self) {
        let Some(stream) = self.media.current() else {
            debug!("camera refresh requested with no stream held");
            return;
        };
        let handle = stream.handle();
        let slot = if self.screen.is_sharing() {
            &self.surfaces.local_pip
        } else {
            &self.surfaces.local_primary
        };
        slot.detach();
        slot.attach(handle);
        debug!("camera stream re-attached");
    }

    pub async fn start_screen_share(&self) -> Result<(), RtcError> {
        self.screen
            .start(self.media.current().map(|s| s.handle()))
            .await
    }

    pub fn stop_screen_share(&self) {
        self.screen.stop(self.media.current().map(|s| s.handle()));
    }

    pub fn toggle_video(&self) -> bool {
        self.media.toggle_video()
    }

    pub fn toggle_audio(&self) -> bool {
        self.media.toggle_audio()
    }

    /// Assembled from the track flags and the screen manager on every read;
    /// cannot diverge from the tracks themselves.
    #[must_use]
    pub fn toggle_state(&self) -> TrackToggleState {
        TrackToggleState {
            video_enabled: self.media.video_enabled(),
            audio_enabled: self.media.audio_enabled(),
            screen_sharing: self.screen.is_sharing(),
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn participants(&self) -> u32 {
        *self.participants_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_participants(&self) -> watch::Receiver<u32> {
        self.participants_tx.subscribe()
    }

    /// Elapsed in-call time, ticking while connected.
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        *self.duration_tx.borrow()
    }

    #[must_use]
    pub fn subscribe_duration(&self) -> watch::Receiver<Duration> {
        self.duration_tx.subscribe()
    }

    /// The media failure backing the retry affordance, when there is one.
    #[must_use]
    pub fn media_error(&self) -> Option<RtcError> {
        self.media_error.lock().clone()
    }

    #[must_use]
    pub fn surfaces(&self) -> &Surfaces {
        &self.surfaces
    }

    pub async fn negotiation_state(&self) -> Option<NegotiationState> {
        self.peer.read().await.as_ref().map(|p| p.state())
    }

    fn start_timer(&self) {
        *self.connected_at.lock() = Some(Instant::now());
        self.duration_tx.send_replace(Duration::ZERO);

        let connected_at = Arc::clone(&self.connected_at);
        let duration_tx = Arc::clone(&self.duration_tx);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let Some(started) = *connected_at.lock() else {
                    break;
                };
                duration_tx.send_replace(started.elapsed());
            }
        });
        *self.timer_task.lock() = Some(handle);
    }

    fn stop_timer(&self) {
        if let Some(task) = self.timer_task.lock().take() {
            task.abort();
        }
        *self.connected_at.lock() = None;
        self.duration_tx.send_replace(Duration::ZERO);
    }
}

/// Consume signaling events for the lifetime of the session.
async fn run_events(runtime: SessionRuntime, mut events: mpsc::UnboundedReceiver<SignalingMessage>) {
    while let Some(message) = events.recv().await {
        match message {
            SignalingMessage::UserJoined { participants, .. } => {
                info!(participants, "participant joined room");
                runtime.participants_tx.send_replace(participants);
                // First to observe a second participant initiates the offer
                if participants >= 2 {
                    let peer = runtime.ensure_peer().await;
                    if peer.state() == NegotiationState::Uninitialized {
                        if let Err(e) = peer.initialize(true, runtime.media.current()).await {
                            warn!(error = %e, "failed to start negotiation");
                        }
                    }
                }
            }
            SignalingMessage::UserLeft { participants, .. } => {
                info!(participants, "participant left room");
                runtime.participants_tx.send_replace(participants);
                // The remaining side keeps its own camera live while waiting
                runtime.surfaces.remote.detach();
            }
            SignalingMessage::Offer { sdp, sender_id, .. } => {
                // An inbound offer implies a peer is present even if no
                // user-joined notification reached us
                runtime
                    .participants_tx
                    .send_replace(runtime.participants().max(2));
                let peer = runtime.ensure_peer().await;
                if let Err(e) = peer
                    .handle_offer(sdp, sender_id, runtime.media.current())
                    .await
                {
                    warn!(error = %e, "failed to answer offer");
                }
            }
            SignalingMessage::Answer { sdp, .. } => {
                let peer = runtime.peer.read().await.clone();
                match peer {
                    Some(peer) => {
                        if let Err(e) = peer.handle_answer(sdp).await {
                            warn!(error = %e, "failed to apply answer");
                        }
                    }
                    None => debug!("answer with no peer connection, discarding"),
                }
            }
            SignalingMessage::IceCandidate { candidate, .. } => {
                let peer = runtime.ensure_peer().await;
                if let Err(e) = peer.handle_ice_candidate(candidate).await {
                    debug!(error = %e, "failed to handle remote candidate");
                }
            }
            // Relay-bound message; nothing to do if it is ever echoed back
            SignalingMessage::JoinRoom { .. } => {}
        }
    }
    debug!("signaling event loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::SyntheticDevices;

    fn controller() -> SessionController {
        let mut config = RtcConfig::default();
        config.ice.stun_servers = Vec::new();
        SessionController::new(config, Arc::new(SyntheticDevices::new()))
    }

    #[tokio::test]
    async fn test_leave_before_join_is_safe() {
        let controller = controller();
        controller.leave().await;
        controller.leave().await;
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        assert_eq!(controller.participants(), 0);
    }

    #[tokio::test]
    async fn test_initial_toggle_state_is_default() {
        let controller = controller();
        assert_eq!(controller.toggle_state(), TrackToggleState::default());
        // No stream held: toggles are no-ops
        assert!(!controller.toggle_video());
        assert!(!controller.toggle_audio());
    }

    #[tokio::test]
    async fn test_refresh_camera_without_stream_is_noop() {
        let controller = controller();
        controller.refresh_camera();
        assert!(!controller.surfaces().local_primary.is_attached());
    }

    #[tokio::test]
    async fn test_join_with_unreachable_relay_fails_clean() {
        let mut config = RtcConfig::default();
        config.signaling.base_url = "http://127.0.0.1:1".to_string();
        config.ice.stun_servers = Vec::new();
        let controller = SessionController::new(config, Arc::new(SyntheticDevices::new()));

        let session = crate::session::VideoSession {
            id: crate::types::SessionId::from("sess-x"),
            session_type: crate::session::SessionType::Consultation,
            participant_ids: (UserId::from("a"), UserId::from("b")),
            scheduled_at: chrono::Utc::now(),
            duration_minutes: 30,
            status: crate::session::SessionStatus::Scheduled,
        };

        let err = controller
            .join(&session, UserId::from("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, RtcError::SignalingUnavailable(_)));
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        // Media acquired in parallel must have been released on unwind
        assert!(!controller.surfaces().local_primary.is_attached());
        assert_eq!(controller.toggle_state(), TrackToggleState::default());
    }
}
