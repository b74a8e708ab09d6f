//! In-process signaling relay for integration tests
//!
//! Implements the relay contract the client depends on: members of a room
//! receive messages in the order the relay saw them, a join notifies the
//! room's existing members (not the joiner), and every other message is
//! fanned out to the other members.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

type Rooms = Arc<Mutex<HashMap<String, Vec<Member>>>>;

pub struct Relay {
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Relay {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("relay addr");
        let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));

        let accept_task = tokio::spawn(async move {
            let mut next_id = 0u64;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                next_id += 1;
                tokio::spawn(handle_client(stream, Arc::clone(&rooms), next_id));
            }
        });

        Self { addr, accept_task }
    }

    /// Base URL in the form the client config expects.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_client(stream: TcpStream, rooms: Rooms, id: u64) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut joined_room: Option<String> = None;
    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };

        match value["type"].as_str() {
            Some("join-room") => {
                let Some(room) = value["roomId"].as_str() else {
                    continue;
                };
                let mut rooms_guard = rooms.lock();
                let members = rooms_guard.entry(room.to_string()).or_default();
                members.push(Member { id, tx: tx.clone() });
                let participants = members.len();

                let notice = serde_json::json!({
                    "type": "user-joined",
                    "roomId": room,
                    "participants": participants,
                })
                .to_string();
                for member in members.iter() {
                    if member.id != id {
                        let _ = member.tx.send(Message::Text(notice.clone().into()));
                    }
                }
                joined_room = Some(room.to_string());
            }
            Some(_) => {
                let Some(room) = joined_room.as_deref() else {
                    continue;
                };
                let rooms_guard = rooms.lock();
                if let Some(members) = rooms_guard.get(room) {
                    for member in members.iter() {
                        if member.id != id {
                            let _ = member.tx.send(Message::Text(text.clone()));
                        }
                    }
                }
            }
            None => {}
        }
    }

    if let Some(room) = joined_room {
        let mut rooms_guard = rooms.lock();
        if let Some(members) = rooms_guard.get_mut(&room) {
            members.retain(|m| m.id != id);
            let notice = serde_json::json!({
                "type": "user-left",
                "roomId": room,
                "participants": members.len(),
            })
            .to_string();
            for member in members.iter() {
                let _ = member.tx.send(Message::Text(notice.clone().into()));
            }
            if members.is_empty() {
                rooms_guard.remove(&room);
            }
        }
    }
    writer.abort();
}
