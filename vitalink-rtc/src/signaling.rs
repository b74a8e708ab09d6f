//! Signaling relay client
//!
//! A persistent WebSocket connection to the per-room relay at
//! `/ws/video-sessions`. The relay fans control messages out to the other
//! members of the room and preserves per-room ordering; this client only
//! encodes, decodes, and pumps.
//!
//! There is no automatic reconnect: a dropped socket ends negotiation for the
//! session and the user recovers by leaving and rejoining.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::SignalingConfig;
use crate::error::RtcError;
use crate::types::{RoomId, UserId};

/// ICE candidate as carried on the wire.
///
/// Field names mirror the browser `RTCIceCandidateInit` dictionary so either
/// end of the relay can be a browser client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl From<webrtc::ice_transport::ice_candidate::RTCIceCandidateInit> for IceCandidatePayload {
    fn from(init: webrtc::ice_transport::ice_candidate::RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidatePayload> for webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
    fn from(payload: IceCandidatePayload) -> Self {
        Self {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_mline_index,
            username_fragment: payload.username_fragment,
        }
    }
}

/// The closed set of messages exchanged over the relay.
///
/// Every variant carries the room it belongs to. Anything else arriving on
/// the socket is ignored, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalingMessage {
    JoinRoom {
        room_id: RoomId,
        user_id: UserId,
    },
    UserJoined {
        room_id: RoomId,
        participants: u32,
    },
    UserLeft {
        room_id: RoomId,
        participants: u32,
    },
    Offer {
        room_id: RoomId,
        sdp: String,
        sender_id: UserId,
    },
    Answer {
        room_id: RoomId,
        sdp: String,
    },
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidatePayload,
    },
}

/// Clonable handle for sending over the channel.
///
/// Sends are fire-and-forget: once the socket has closed, messages are
/// dropped with a debug log. Negotiation-critical callers check connection
/// state before relying on a send.
#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingSender {
    pub fn send(&self, message: SignalingMessage) {
        if self.tx.send(message).is_err() {
            debug!("signaling channel closed, dropping outbound message");
        }
    }

    /// A sender wired to a bare channel, for driving components without a
    /// live socket.
    #[must_use]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// A live connection to the relay for one room.
pub struct SignalingChannel {
    sender: SignalingSender,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl SignalingChannel {
    /// Connect, join the room, and start the message pumps.
    ///
    /// Returns the channel plus the stream of inbound messages for the room.
    pub async fn connect(
        config: &SignalingConfig,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingMessage>), RtcError> {
        let endpoint = config.ws_endpoint()?;

        let (socket, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| RtcError::SignalingUnavailable(e.to_string()))?;

        info!(room_id = %room_id, user_id = %user_id, endpoint = %endpoint, "signaling connected");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingMessage>();

        // Announce ourselves before anything else can be sent
        let join = SignalingMessage::JoinRoom {
            room_id: room_id.clone(),
            user_id,
        };
        let _ = out_tx.send(join);

        let write_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode signaling message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "signaling write failed, stopping writer");
                    break;
                }
            }
            // Best-effort close frame on the way out
            let _ = sink.send(Message::Close(None)).await;
        });

        let read_room = room_id;
        let read_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<SignalingMessage>(&text) {
                            Ok(message) => {
                                if in_tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Unknown message types are ignored, not fatal
                                debug!(error = %e, "ignoring unrecognized signaling message");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!(room_id = %read_room, "relay closed the connection");
                        break;
                    }
                    Ok(_) => {} // binary / ping / pong
                    Err(e) => {
                        warn!(room_id = %read_room, error = %e, "signaling read error");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                sender: SignalingSender { tx: out_tx },
                read_task,
                write_task,
            },
            in_rx,
        ))
    }

    #[must_use]
    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Close the socket and stop the pumps. No reconnect is attempted.
    ///
    /// Aborting the writer drops the sink, which closes the connection even
    /// while sender clones are still held elsewhere.
    pub fn disconnect(self) {
        self.read_task.abort();
        self.write_task.abort();
        drop(self.sender);
        debug!("signaling disconnected");
    }
}
