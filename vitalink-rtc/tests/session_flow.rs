//! End-to-end session flows against an in-process relay

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Relay;
use vitalink_rtc::{
    ConnectionState, NegotiationState, RtcConfig, SessionController, SessionId, SessionStatus,
    SessionType, SyntheticDevices, UserId, VideoSession,
};

fn test_config(relay: &Relay) -> RtcConfig {
    let mut config = RtcConfig::default();
    config.signaling.base_url = relay.base_url();
    // Host candidates only: keep tests off the network
    config.ice.stun_servers = Vec::new();
    config
}

fn session(id: &str) -> VideoSession {
    VideoSession {
        id: SessionId::from(id),
        session_type: SessionType::Therapy,
        participant_ids: (UserId::from("therapist-1"), UserId::from("client-1")),
        scheduled_at: chrono::Utc::now(),
        duration_minutes: 50,
        status: SessionStatus::Scheduled,
    }
}

async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check().await
}

#[tokio::test]
async fn test_two_clients_reach_established_negotiation() {
    let relay = Relay::spawn().await;
    let config = test_config(&relay);

    let alice = SessionController::new(config.clone(), Arc::new(SyntheticDevices::new()));
    let bob = SessionController::new(config, Arc::new(SyntheticDevices::new()));
    let record = session("sess-e2e-1");

    alice
        .join(&record, UserId::from("therapist-1"))
        .await
        .unwrap();
    assert_eq!(alice.connection_state(), ConnectionState::Connected);
    assert_eq!(alice.participants(), 1);

    bob.join(&record, UserId::from("client-1")).await.unwrap();
    assert_eq!(bob.connection_state(), ConnectionState::Connected);

    // Alice is the first to observe participants == 2, so she offers and Bob
    // answers; both sides must reach established negotiation.
    let established = wait_until(Duration::from_secs(10), || async {
        alice.negotiation_state().await == Some(NegotiationState::Established)
            && bob.negotiation_state().await == Some(NegotiationState::Established)
    })
    .await;
    assert!(established, "offer/answer exchange did not complete");

    assert_eq!(alice.participants(), 2);
    assert_eq!(bob.participants(), 2);
    // The in-call timer is running on both sides
    assert_eq!(alice.connection_state(), ConnectionState::Connected);

    alice.leave().await;
    // leave() is idempotent
    alice.leave().await;
    assert_eq!(alice.connection_state(), ConnectionState::Disconnected);

    bob.leave().await;
    assert_eq!(bob.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_peer_departure_keeps_local_session_alive() {
    let relay = Relay::spawn().await;
    let config = test_config(&relay);

    let alice = SessionController::new(config.clone(), Arc::new(SyntheticDevices::new()));
    let bob = SessionController::new(config, Arc::new(SyntheticDevices::new()));
    let record = session("sess-e2e-2");

    alice
        .join(&record, UserId::from("therapist-1"))
        .await
        .unwrap();
    bob.join(&record, UserId::from("client-1")).await.unwrap();

    let saw_peer = wait_until(Duration::from_secs(10), || async {
        alice.participants() == 2
    })
    .await;
    assert!(saw_peer, "second participant never announced");

    bob.leave().await;

    let saw_departure = wait_until(Duration::from_secs(10), || async {
        alice.participants() == 1
    })
    .await;
    assert!(saw_departure, "departure never announced");

    // Remaining side stays in the session with its own camera live
    assert_eq!(alice.connection_state(), ConnectionState::Connected);
    assert!(!alice.surfaces().remote.is_attached());
    assert!(alice.surfaces().local_primary.is_attached());

    alice.leave().await;
}

#[tokio::test]
async fn test_leave_mid_negotiation_releases_everything() {
    let relay = Relay::spawn().await;
    let config = test_config(&relay);

    let alice = SessionController::new(config.clone(), Arc::new(SyntheticDevices::new()));
    let bob = SessionController::new(config, Arc::new(SyntheticDevices::new()));
    let record = session("sess-e2e-3");

    alice
        .join(&record, UserId::from("therapist-1"))
        .await
        .unwrap();
    bob.join(&record, UserId::from("client-1")).await.unwrap();

    // Leave the moment negotiation starts on Alice's side
    let negotiating = wait_until(Duration::from_secs(10), || async {
        alice.negotiation_state().await.is_some()
    })
    .await;
    assert!(negotiating, "negotiation never started");

    alice.leave().await;

    assert_eq!(alice.connection_state(), ConnectionState::Disconnected);
    assert_eq!(alice.participants(), 0);
    assert!(!alice.surfaces().local_primary.is_attached());
    assert!(!alice.surfaces().remote.is_attached());
    assert_eq!(alice.session_duration(), Duration::ZERO);

    bob.leave().await;
}

/// Full media flow requires real ICE + DTLS over loopback; run manually.
#[tokio::test]
#[ignore = "exercises live ICE/DTLS loopback connectivity"]
async fn test_remote_media_arrives_end_to_end() {
    let relay = Relay::spawn().await;
    let config = test_config(&relay);

    let alice = SessionController::new(config.clone(), Arc::new(SyntheticDevices::new()));
    let bob = SessionController::new(config, Arc::new(SyntheticDevices::new()));
    let record = session("sess-e2e-4");

    alice
        .join(&record, UserId::from("therapist-1"))
        .await
        .unwrap();
    bob.join(&record, UserId::from("client-1")).await.unwrap();

    let media_flowing = wait_until(Duration::from_secs(30), || async {
        alice.surfaces().remote.is_attached() && bob.surfaces().remote.is_attached()
    })
    .await;
    assert!(media_flowing, "remote streams never arrived");

    alice.leave().await;
    bob.leave().await;
}
