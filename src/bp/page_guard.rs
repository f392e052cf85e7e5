use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::bp::frame::{release_pin, FrameHeader};
use crate::bp::replacer::LruKReplacer;
use crate::page::PageId;

/// Shared, latched access to one resident page.
///
/// The guard owns one pin on the frame and the frame's shared latch. Both
/// are released on drop, in that order, so a thread that observes a pin
/// count of zero can rely on the latch being free shortly after. Guards hold
/// reference-counted handles to the frame and the replacer and may outlive
/// the manager that created them.
pub struct ReadPageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    replacer: Arc<Mutex<LruKReplacer>>,
}

impl ReadPageGuard {
    /// Block until the frame's shared latch is granted. The caller has
    /// already pinned the frame; the guard owns that pin from here on.
    pub(crate) fn acquire(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        replacer: Arc<Mutex<LruKReplacer>>,
    ) -> Self {
        frame.latch().shared();
        ReadPageGuard {
            page_id,
            frame,
            replacer,
        }
    }

    /// The page this guard protects.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: the shared latch is held for the guard's lifetime.
        unsafe { self.frame.page() }.get_raw_bytes()
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        release_pin(&self.frame, &self.replacer);
        self.frame.latch().release_shared();
    }
}

impl Debug for ReadPageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Exclusive, latched access to one resident page.
///
/// Mirror of [`ReadPageGuard`] with the exclusive latch; additionally the
/// first mutable access marks the frame dirty.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    replacer: Arc<Mutex<LruKReplacer>>,
    downgraded: AtomicBool,
}

impl WritePageGuard {
    /// Block until the frame's exclusive latch is granted. The caller has
    /// already pinned the frame; the guard owns that pin from here on.
    pub(crate) fn acquire(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        replacer: Arc<Mutex<LruKReplacer>>,
    ) -> Self {
        frame.latch().exclusive();
        Self::from_latched(page_id, frame, replacer)
    }

    /// Adopt a frame whose exclusive latch the caller already holds. Used by
    /// the bring-in path, which latches the frame at reservation time so
    /// that late arrivers block instead of observing a half-loaded buffer.
    pub(crate) fn from_latched(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        replacer: Arc<Mutex<LruKReplacer>>,
    ) -> Self {
        WritePageGuard {
            page_id,
            frame,
            replacer,
            downgraded: AtomicBool::new(false),
        }
    }

    /// The page this guard protects.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: the exclusive latch is held for the guard's lifetime.
        unsafe { self.frame.page() }.get_raw_bytes()
    }

    /// Mutable view of the page. Marks the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.set_dirty(true);
        // SAFETY: the exclusive latch is held for the guard's lifetime.
        unsafe { self.frame.page_mut() }.get_raw_bytes_mut()
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }

    /// Exclusive to shared without a window for another writer. The pin
    /// carries over to the returned read guard.
    pub fn downgrade(self) -> ReadPageGuard {
        self.frame.latch().downgrade();
        self.downgraded.store(true, Ordering::Relaxed);
        ReadPageGuard {
            page_id: self.page_id,
            frame: Arc::clone(&self.frame),
            replacer: Arc::clone(&self.replacer),
        }
    }

    pub(crate) fn frame(&self) -> &Arc<FrameHeader> {
        &self.frame
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        if self.downgraded.load(Ordering::Relaxed) {
            return;
        }
        release_pin(&self.frame, &self.replacer);
        self.frame.latch().release_exclusive();
    }
}

impl Debug for WritePageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bp::frame::FrameId;
    use crate::bp::replacer::Replacer;
    use std::thread;

    fn make_frame(frame_id: FrameId) -> (Arc<FrameHeader>, Arc<Mutex<LruKReplacer>>) {
        (
            Arc::new(FrameHeader::new(frame_id)),
            Arc::new(Mutex::new(LruKReplacer::new(4, 2))),
        )
    }

    fn pin(frame: &FrameHeader, replacer: &Mutex<LruKReplacer>) {
        let mut replacer = replacer.lock().unwrap();
        replacer.record_access(frame.frame_id());
        if frame.pin() == 1 {
            replacer.set_evictable(frame.frame_id(), false);
        }
    }

    #[test]
    fn test_read_guard_lifecycle() {
        let (frame, replacer) = make_frame(0);
        pin(&frame, &replacer);
        let guard = ReadPageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        assert_eq!(guard.page_id(), 0);
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.latch().is_shared());
        assert!(guard.iter().all(|&b| b == 0));

        drop(guard);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.latch().is_locked());
        assert_eq!(replacer.lock().unwrap().size(), 1);
    }

    #[test]
    fn test_read_guards_share_the_frame() {
        let (frame, replacer) = make_frame(0);
        pin(&frame, &replacer);
        let g1 = ReadPageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        pin(&frame, &replacer);
        let g2 = ReadPageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        assert_eq!(frame.pin_count(), 2);
        drop(g1);
        assert_eq!(frame.pin_count(), 1);
        drop(g2);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_write_guard_marks_dirty_only_on_data_mut() {
        let (frame, replacer) = make_frame(0);
        pin(&frame, &replacer);
        let mut guard = WritePageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        assert!(!guard.is_dirty());
        let _ = guard.data();
        assert!(!guard.is_dirty());
        guard.data_mut()[0] = 1;
        assert!(guard.is_dirty());
    }

    #[test]
    fn test_write_guard_excludes_other_guards() {
        let (frame, replacer) = make_frame(0);
        pin(&frame, &replacer);
        let guard = WritePageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        assert!(frame.latch().is_exclusive());
        assert!(!frame.latch().try_shared());
        drop(guard);
        assert!(!frame.latch().is_locked());
    }

    #[test]
    fn test_downgrade_keeps_pin_and_data() {
        let (frame, replacer) = make_frame(0);
        pin(&frame, &replacer);
        let mut guard = WritePageGuard::acquire(7, Arc::clone(&frame), Arc::clone(&replacer));
        guard.data_mut()[0] = 9;
        let read_guard = guard.downgrade();
        assert_eq!(read_guard.page_id(), 7);
        assert_eq!(read_guard.data()[0], 9);
        assert!(read_guard.is_dirty());
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.latch().is_shared());
        drop(read_guard);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.latch().is_locked());
    }

    #[test]
    fn test_concurrent_write_guards_serialize() {
        let (frame, replacer) = make_frame(0);
        thread::scope(|s| {
            for _ in 0..3 {
                let frame = &frame;
                let replacer = &replacer;
                s.spawn(move || {
                    for _ in 0..80 {
                        pin(frame, replacer);
                        let mut guard = WritePageGuard::acquire(
                            0,
                            Arc::clone(frame),
                            Arc::clone(replacer),
                        );
                        guard.data_mut()[0] += 1;
                    }
                });
            }
        });
        pin(&frame, &replacer);
        let guard = ReadPageGuard::acquire(0, Arc::clone(&frame), Arc::clone(&replacer));
        assert_eq!(guard.data()[0], 240);
    }
}
