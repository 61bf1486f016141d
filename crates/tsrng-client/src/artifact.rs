//! Revocable handles to downloaded round output.
//!
//! An `ArtifactHandle` is a shared reference to a byte blob that can be
//! revoked exactly once; clones observe the revocation and lose access to
//! the bytes. `ArtifactSlot` holds at most one live handle and revokes the
//! previous one whenever it is replaced or cleared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use uuid::Uuid;

use crate::service::RoundId;

#[derive(Debug)]
struct ArtifactInner {
    id: Uuid,
    round_id: RoundId,
    len: usize,
    /// `None` once revoked.
    data: Mutex<Option<Bytes>>,
}

/// Shared, revocable reference to a canonical-length output blob.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    inner: Arc<ArtifactInner>,
}

impl ArtifactHandle {
    pub fn new(round_id: RoundId, data: Bytes) -> Self {
        Self {
            inner: Arc::new(ArtifactInner {
                id: Uuid::new_v4(),
                round_id,
                len: data.len(),
                data: Mutex::new(Some(data)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn round_id(&self) -> &RoundId {
        &self.inner.round_id
    }

    /// Size of the blob at creation time.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// The blob, or `None` after revocation.
    pub fn bytes(&self) -> Option<Bytes> {
        self.data().clone()
    }

    pub fn is_revoked(&self) -> bool {
        self.data().is_none()
    }

    /// Release the blob. Returns `true` only for the call that revoked it.
    pub fn revoke(&self) -> bool {
        let released = self.data().take().is_some();
        if released {
            tracing::debug!(
                artifact = %self.inner.id,
                round_id = %self.inner.round_id,
                "Artifact revoked"
            );
        }
        released
    }

    fn data(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PartialEq for ArtifactHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

/// Single-owner holder for the current artifact.
///
/// Every exit path (replace, clear, drop) goes through `revoke`, so each
/// handle is released exactly once.
#[derive(Debug, Default)]
pub struct ArtifactSlot {
    current: Mutex<Option<ArtifactHandle>>,
    revocations: AtomicUsize,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new handle, revoking any previous one first.
    pub fn replace(&self, handle: ArtifactHandle) {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            self.revoke(&previous);
        }
        *current = Some(handle);
    }

    /// Revoke and drop the held handle, if any. Returns whether one was live.
    pub fn clear(&self) -> bool {
        let previous = self.lock().take();
        match previous {
            Some(handle) => self.revoke(&handle),
            None => false,
        }
    }

    pub fn current(&self) -> Option<ArtifactHandle> {
        self.lock().clone()
    }

    /// Number of handles this slot has revoked over its lifetime.
    pub fn revocations(&self) -> usize {
        self.revocations.load(Ordering::SeqCst)
    }

    fn revoke(&self, handle: &ArtifactHandle) -> bool {
        let released = handle.revoke();
        if released {
            self.revocations.fetch_add(1, Ordering::SeqCst);
        }
        released
    }

    fn lock(&self) -> MutexGuard<'_, Option<ArtifactHandle>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ArtifactSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(round: &str, data: &'static [u8]) -> ArtifactHandle {
        ArtifactHandle::new(RoundId::new(round), Bytes::from_static(data))
    }

    #[test]
    fn double_revoke_is_noop() {
        let h = handle("r1", b"0101");
        assert_eq!(h.bytes().as_deref(), Some(&b"0101"[..]));
        assert!(h.revoke());
        assert!(!h.revoke());
        assert!(h.is_revoked());
        assert!(h.bytes().is_none());
        assert_eq!(h.len(), 4);
    }

    #[test]
    fn clones_observe_revocation() {
        let h = handle("r1", b"01");
        let clone = h.clone();
        h.revoke();
        assert!(clone.is_revoked());
        assert_eq!(clone, h);
    }

    #[test]
    fn replace_revokes_previous_exactly_once() {
        let slot = ArtifactSlot::new();
        let first = handle("r1", b"1");
        let second = handle("r2", b"0");

        slot.replace(first.clone());
        slot.replace(second.clone());

        assert!(first.is_revoked());
        assert!(!second.is_revoked());
        assert_eq!(slot.revocations(), 1);
        assert_eq!(slot.current().map(|h| h.id()), Some(second.id()));
    }

    #[test]
    fn clear_is_idempotent() {
        let slot = ArtifactSlot::new();
        slot.replace(handle("r1", b"1"));
        assert!(slot.clear());
        assert!(!slot.clear());
        assert_eq!(slot.revocations(), 1);
        assert!(slot.current().is_none());
    }

    #[test]
    fn externally_revoked_handle_is_not_counted_twice() {
        let slot = ArtifactSlot::new();
        let h = handle("r1", b"1");
        slot.replace(h.clone());
        h.revoke();
        assert!(!slot.clear());
        assert_eq!(slot.revocations(), 0);
    }

    #[test]
    fn drop_releases_held_handle() {
        let h = handle("r1", b"1");
        {
            let slot = ArtifactSlot::new();
            slot.replace(h.clone());
        }
        assert!(h.is_revoked());
    }
}
