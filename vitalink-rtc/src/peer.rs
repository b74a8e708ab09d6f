//! Peer connection management
//!
//! This module handles:
//! - The single WebRTC transport of a session
//! - Offer/answer negotiation driven by signaling events
//! - ICE candidate exchange, with buffering for early arrivals
//! - Safe teardown at any point of the negotiation
//!
//! Screen share start/stop deliberately does not renegotiate: only the
//! initially negotiated camera/microphone tracks cross the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceConfig;
use crate::error::RtcError;
use crate::media::LocalStream;
use crate::signaling::{IceCandidatePayload, SignalingMessage, SignalingSender};
use crate::surface::{RemoteStream, Slot};
use crate::types::{RoomId, UserId};

/// Negotiation progress of the single peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Uninitialized,
    InitiatorOffering,
    AwaitingAnswer,
    Answering,
    Established,
    Closed,
}

/// Owns the session's peer-to-peer transport and drives its negotiation.
///
/// Consumes signaling events, produces the remote stream. The session
/// controller is the only caller; nothing here releases resources it did not
/// create.
pub struct PeerConnectionManager {
    room_id: RoomId,
    user_id: UserId,
    stun_servers: Vec<String>,
    outbound: SignalingSender,
    remote_slot: Slot<RemoteStream>,
    state: Arc<RwLock<NegotiationState>>,
    pc: tokio::sync::RwLock<Option<Arc<RTCPeerConnection>>>,
    /// Remote candidates that arrived before the remote description
    pending_candidates: Mutex<Vec<IceCandidatePayload>>,
    remote_ready: AtomicBool,
}

impl PeerConnectionManager {
    pub fn new(
        room_id: RoomId,
        user_id: UserId,
        ice: &IceConfig,
        outbound: SignalingSender,
        remote_slot: Slot<RemoteStream>,
    ) -> Self {
        Self {
            room_id,
            user_id,
            stun_servers: ice.stun_servers.clone(),
            outbound,
            remote_slot,
            state: Arc::new(RwLock::new(NegotiationState::Uninitialized)),
            pc: tokio::sync::RwLock::new(None),
            pending_candidates: Mutex::new(Vec::new()),
            remote_ready: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        *self.state.read()
    }

    fn is_closed(&self) -> bool {
        self.state() == NegotiationState::Closed
    }

    /// Move to `next` unless the connection was closed in the meantime.
    fn transition(&self, next: NegotiationState) {
        let mut state = self.state.write();
        if *state != NegotiationState::Closed {
            *state = next;
        }
    }

    /// Create the transport and run the initiator's half of the handshake.
    ///
    /// With no local stream (media denied), recvonly transceivers keep the
    /// session able to receive the remote's media.
    pub async fn initialize(
        &self,
        is_initiator: bool,
        local: Option<Arc<LocalStream>>,
    ) -> Result<(), RtcError> {
        {
            let mut state = self.state.write();
            match *state {
                NegotiationState::Closed => return Ok(()),
                NegotiationState::Uninitialized => {}
                current => {
                    debug!(state = ?current, "peer connection already initialized");
                    return Ok(());
                }
            }
            *state = if is_initiator {
                NegotiationState::InitiatorOffering
            } else {
                NegotiationState::Answering
            };
        }

        let pc = self.build_transport(local.as_deref()).await?;
        {
            let mut guard = self.pc.write().await;
            if self.is_closed() {
                // Left the session while the transport was being built
                drop(guard);
                let _ = pc.close().await;
                return Ok(());
            }
            *guard = Some(Arc::clone(&pc));
        }

        if is_initiator {
            let offer = match pc.create_offer(None).await {
                Ok(offer) => offer,
                Err(_) if self.is_closed() => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if self.is_closed() {
                return Ok(());
            }
            match pc.set_local_description(offer.clone()).await {
                Ok(()) => {}
                Err(_) if self.is_closed() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            self.outbound.send(SignalingMessage::Offer {
                room_id: self.room_id.clone(),
                sdp: offer.sdp,
                sender_id: self.user_id.clone(),
            });
            self.transition(NegotiationState::AwaitingAnswer);
            info!(room_id = %self.room_id, "offer sent, awaiting answer");
        }

        Ok(())
    }

    /// Answering side of the handshake.
    pub async fn handle_offer(
        &self,
        sdp: String,
        sender_id: UserId,
        local: Option<Arc<LocalStream>>,
    ) -> Result<(), RtcError> {
        if self.is_closed() {
            return Ok(());
        }
        debug!(room_id = %self.room_id, sender_id = %sender_id, "received offer");

        if self.pc.read().await.is_none() {
            self.initialize(false, local).await?;
        }
        if self.state() != NegotiationState::Answering {
            debug!(state = ?self.state(), "offer outside answering flow, discarding");
            return Ok(());
        }
        let Some(pc) = self.pc.read().await.clone() else {
            return Ok(());
        };

        let offer = RTCSessionDescription::offer(sdp)?;
        match pc.set_remote_description(offer).await {
            Ok(()) => {}
            Err(_) if self.is_closed() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.remote_ready.store(true, Ordering::Relaxed);
        self.flush_pending(&pc).await;

        let answer = match pc.create_answer(None).await {
            Ok(answer) => answer,
            Err(_) if self.is_closed() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match pc.set_local_description(answer.clone()).await {
            Ok(()) => {}
            Err(_) if self.is_closed() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.outbound.send(SignalingMessage::Answer {
            room_id: self.room_id.clone(),
            sdp: answer.sdp,
        });
        self.transition(NegotiationState::Established);
        info!(room_id = %self.room_id, "answer sent, negotiation established");
        Ok(())
    }

    /// Apply the remote answer. Only valid while awaiting one; a duplicate or
    /// late answer is discarded without touching the remote description.
    pub async fn handle_answer(&self, sdp: String) -> Result<(), RtcError> {
        if self.state() != NegotiationState::AwaitingAnswer {
            debug!(
                state = ?self.state(),
                "discarding answer outside awaiting-answer"
            );
            return Ok(());
        }
        let Some(pc) = self.pc.read().await.clone() else {
            return Ok(());
        };

        let answer = RTCSessionDescription::answer(sdp)?;
        match pc.set_remote_description(answer).await {
            Ok(()) => {}
            Err(_) if self.is_closed() => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.remote_ready.store(true, Ordering::Relaxed);
        self.flush_pending(&pc).await;
        self.transition(NegotiationState::Established);
        info!(room_id = %self.room_id, "answer applied, negotiation established");
        Ok(())
    }

    /// Add a remote candidate. Candidates may legitimately arrive before the
    /// descriptions are exchanged; those are buffered and flushed later.
    pub async fn handle_ice_candidate(
        &self,
        candidate: IceCandidatePayload,
    ) -> Result<(), RtcError> {
        if self.is_closed() {
            return Ok(());
        }
        let pc = self.pc.read().await.clone();
        match pc {
            Some(pc) if self.remote_ready.load(Ordering::Relaxed) => {
                if let Err(e) = pc.add_ice_candidate(candidate.into()).await {
                    // A malformed or outdated candidate must not kill the call
                    debug!(error = %e, "failed to add remote candidate");
                }
            }
            _ => {
                debug!(room_id = %self.room_id, "buffering early remote candidate");
                self.pending_candidates.lock().push(candidate);
            }
        }
        Ok(())
    }

    /// Close the transport. Safe to call repeatedly and from any state; late
    /// async completions become no-ops against the closed transport.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == NegotiationState::Closed {
                return;
            }
            *state = NegotiationState::Closed;
        }
        self.pending_candidates.lock().clear();
        if let Some(pc) = self.pc.write().await.take() {
            if let Err(e) = pc.close().await {
                debug!(error = %e, "peer connection close failed");
            }
        }
        info!(room_id = %self.room_id, "peer connection closed");
    }

    async fn flush_pending(&self, pc: &RTCPeerConnection) {
        let pending: Vec<IceCandidatePayload> =
            std::mem::take(&mut *self.pending_candidates.lock());
        for candidate in pending {
            if let Err(e) = pc.add_ice_candidate(candidate.into()).await {
                debug!(error = %e, "failed to add buffered candidate");
            }
        }
    }

    async fn build_transport(
        &self,
        local: Option<&LocalStream>,
    ) -> Result<Arc<RTCPeerConnection>, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        match local {
            Some(stream) => {
                for track in stream.transport_tracks() {
                    pc.add_track(track).await?;
                }
            }
            None => {
                pc.add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await?;
                pc.add_transceiver_from_kind(
                    RTPCodecType::Video,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await?;
            }
        }

        // Remote media: the first announced remote stream is attached to the
        // remote surface; further streams are ignored.
        let remote_slot = self.remote_slot.clone();
        let accumulator: Arc<Mutex<Option<RemoteStream>>> = Arc::new(Mutex::new(None));
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let remote_slot = remote_slot.clone();
            let accumulator = Arc::clone(&accumulator);
            Box::pin(async move {
                let stream_id = track.stream_id();
                let mut accumulator = accumulator.lock();
                let stream = accumulator.get_or_insert_with(|| RemoteStream {
                    id: stream_id.clone(),
                    tracks: Vec::new(),
                });
                if stream.id != stream_id {
                    debug!(stream_id = %stream_id, "ignoring track of secondary remote stream");
                    return;
                }
                stream.tracks.push(track);
                remote_slot.attach(stream.clone());
            })
        }));

        // Local candidates go straight out over signaling, tagged with the room
        let outbound = self.outbound.clone();
        let candidate_room = self.room_id.clone();
        let candidate_state = Arc::clone(&self.state);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let outbound = outbound.clone();
            let room_id = candidate_room.clone();
            let state = Arc::clone(&candidate_state);
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                if *state.read() == NegotiationState::Closed {
                    return;
                }
                match candidate.to_json() {
                    Ok(init) => outbound.send(SignalingMessage::IceCandidate {
                        room_id,
                        candidate: init.into(),
                    }),
                    Err(e) => debug!(error = %e, "failed to serialize local candidate"),
                }
            })
        }));

        let log_room = self.room_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let room_id = log_room.clone();
            Box::pin(async move {
                info!(room_id = %room_id, state = %state, "peer connection state changed");
            })
        }));

        Ok(pc)
    }
}
