//! Permission-denial recovery and screen share flows

mod common;

use std::sync::Arc;

use common::Relay;
use vitalink_rtc::{
    ConnectionState, RtcConfig, SessionController, SessionId, SessionStatus, SessionType,
    StreamSource, SyntheticDevices, UserId, VideoSession,
};

fn test_config(relay: &Relay) -> RtcConfig {
    let mut config = RtcConfig::default();
    config.signaling.base_url = relay.base_url();
    config.ice.stun_servers = Vec::new();
    config
}

fn session(id: &str) -> VideoSession {
    VideoSession {
        id: SessionId::from(id),
        session_type: SessionType::Consultation,
        participant_ids: (UserId::from("therapist-1"), UserId::from("client-1")),
        scheduled_at: chrono::Utc::now(),
        duration_minutes: 30,
        status: SessionStatus::Scheduled,
    }
}

#[tokio::test]
async fn test_camera_denial_then_retry_without_rejoin() {
    let relay = Relay::spawn().await;
    let devices = Arc::new(SyntheticDevices::new());
    devices.deny_next_stream(1);
    let controller = SessionController::new(test_config(&relay), devices.clone());

    // Join proceeds despite the denial: signaling must not leave the remote
    // peer waiting.
    controller
        .join(&session("sess-retry"), UserId::from("client-1"))
        .await
        .unwrap();
    assert_eq!(controller.connection_state(), ConnectionState::Connected);

    let err = controller.media_error().expect("denial recorded");
    assert!(err.is_recoverable());
    assert!(!controller.surfaces().local_primary.is_attached());
    assert!(!controller.toggle_state().video_enabled);

    // Second attempt is granted; camera goes live in place
    controller.retry_media().await.unwrap();
    assert!(controller.media_error().is_none());
    assert!(controller.surfaces().local_primary.is_attached());
    assert!(controller.toggle_state().video_enabled);
    assert!(controller.toggle_state().audio_enabled);
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    assert_eq!(devices.stream_acquisitions(), 1);

    controller.leave().await;
}

#[tokio::test]
async fn test_screen_share_cycle_restores_camera_without_reprompt() {
    let relay = Relay::spawn().await;
    let devices = Arc::new(SyntheticDevices::new());
    let controller = SessionController::new(test_config(&relay), devices.clone());

    controller
        .join(&session("sess-share"), UserId::from("therapist-1"))
        .await
        .unwrap();

    let camera = controller
        .surfaces()
        .local_primary
        .current()
        .expect("camera on primary after join");
    assert_eq!(camera.source(), StreamSource::Camera);

    controller.start_screen_share().await.unwrap();
    assert!(controller.toggle_state().screen_sharing);
    let primary = controller.surfaces().local_primary.current().unwrap();
    assert_eq!(primary.source(), StreamSource::Screen);
    // Camera stays held and rendered as picture-in-picture
    assert_eq!(controller.surfaces().local_pip.current(), Some(camera.clone()));

    // Starting again is a no-op
    controller.start_screen_share().await.unwrap();
    assert_eq!(devices.display_acquisitions(), 1);

    controller.stop_screen_share();
    assert!(!controller.toggle_state().screen_sharing);
    assert_eq!(
        controller.surfaces().local_primary.current(),
        Some(camera)
    );
    assert!(controller.surfaces().local_pip.current().is_none());
    // The camera was never re-acquired, so no permission re-prompt
    assert_eq!(devices.stream_acquisitions(), 1);

    controller.leave().await;
}

#[tokio::test]
async fn test_camera_refresh_reattaches_same_stream() {
    let relay = Relay::spawn().await;
    let devices = Arc::new(SyntheticDevices::new());
    let controller = SessionController::new(test_config(&relay), devices.clone());

    controller
        .join(&session("sess-refresh"), UserId::from("client-1"))
        .await
        .unwrap();

    let before = controller.surfaces().local_primary.current().unwrap();
    let mut observer = controller.surfaces().local_primary.subscribe();
    observer.mark_unchanged();

    controller.refresh_camera();

    assert!(observer.has_changed().unwrap());
    assert_eq!(
        controller.surfaces().local_primary.current(),
        Some(before)
    );
    // Repair is local-only: no new acquisition happened
    assert_eq!(devices.stream_acquisitions(), 1);

    controller.leave().await;
}
