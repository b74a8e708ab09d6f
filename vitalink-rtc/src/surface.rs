//! Rendering surface slots
//!
//! A surface is where a stream is rendered, not the stream itself. Attaching
//! and detaching only changes which stream a surface points at; it never
//! touches the underlying tracks. The UI layer subscribes to the slots and
//! re-renders on change.

use std::sync::Arc;
use tokio::sync::watch;
use webrtc::track::track_remote::TrackRemote;

/// What kind of stream a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Camera,
    Screen,
}

/// Cheap, cloneable reference to a held local stream.
///
/// Handles identify streams on surfaces; they carry no ownership. Releasing
/// tracks stays the privilege of whoever holds the stream itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    id: String,
    source: StreamSource,
}

impl StreamHandle {
    pub(crate) fn new(id: impl Into<String>, source: StreamSource) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn source(&self) -> StreamSource {
        self.source
    }
}

/// The remote participant's media, as announced by the peer connection
#[derive(Clone, Default)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// A single rendering slot observable through a watch channel.
///
/// Every attach/detach notifies subscribers, including re-attaching the same
/// stream (that is what a camera refresh is).
pub struct Slot<T: Clone + Send + Sync + 'static> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Slot<T> {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn attach(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    pub fn detach(&self) {
        self.tx.send_replace(None);
    }

    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

/// The three rendering surfaces of a session view
#[derive(Clone, Default)]
pub struct Surfaces {
    /// Main local surface: camera, or the screen stream while sharing
    pub local_primary: Slot<StreamHandle>,
    /// Picture-in-picture camera overlay shown during screen share
    pub local_pip: Slot<StreamHandle>,
    /// The remote participant's media
    pub remote: Slot<RemoteStream>,
}

impl Surfaces {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_all(&self) {
        self.local_primary.detach();
        self.local_pip.detach();
        self.remote.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_current() {
        let slot = Slot::new();
        assert!(!slot.is_attached());

        let handle = StreamHandle::new("cam-1", StreamSource::Camera);
        slot.attach(handle.clone());
        assert_eq!(slot.current(), Some(handle));

        slot.detach();
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_reattach_notifies_subscribers() {
        let slot = Slot::new();
        let mut rx = slot.subscribe();

        let handle = StreamHandle::new("cam-1", StreamSource::Camera);
        slot.attach(handle.clone());
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        // Re-attaching the same handle still counts as a change (camera refresh)
        slot.attach(handle);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_clear_all() {
        let surfaces = Surfaces::new();
        surfaces
            .local_primary
            .attach(StreamHandle::new("cam", StreamSource::Camera));
        surfaces
            .local_pip
            .attach(StreamHandle::new("cam", StreamSource::Camera));
        surfaces.remote.attach(RemoteStream::default());

        surfaces.clear_all();
        assert!(!surfaces.local_primary.is_attached());
        assert!(!surfaces.local_pip.is_attached());
        assert!(!surfaces.remote.is_attached());
    }
}
