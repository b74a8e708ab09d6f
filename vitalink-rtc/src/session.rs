//! Scheduled session records
//!
//! A [`VideoSession`] is created by the platform's scheduling service and
//! consumed read-only by this subsystem: it tells the client which room to
//! join. Status transitions are reported back to the platform by an outer
//! layer, never mutated here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RoomId, SessionId, UserId};

/// Kind of appointment the call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Therapy,
    Consultation,
}

/// Scheduling state of a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// A scheduled or ad-hoc video call between two participants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSession {
    pub id: SessionId,

    pub session_type: SessionType,

    /// Ordered pair: initiator first, counterpart second
    pub participant_ids: (UserId, UserId),

    pub scheduled_at: DateTime<Utc>,

    pub duration_minutes: u32,

    pub status: SessionStatus,
}

impl VideoSession {
    /// The signaling room for this session. One room per session record.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        RoomId::from(self.id.as_str())
    }
}
