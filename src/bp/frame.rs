use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::bp::replacer::{LruKReplacer, Replacer};
use crate::page::{Page, PageId, INVALID_PAGE_ID};
use crate::rwlatch::RwLatch;

pub type FrameId = u32;

/// One slot of the buffer pool: a page-sized buffer plus the metadata the
/// pool and the guards coordinate through.
///
/// The buffer is only dereferenced while `latch` is held in the matching
/// mode. `page_id`, `pin_count` and `is_dirty` are atomics so they can be
/// inspected without taking the pool latch.
pub struct FrameHeader {
    frame_id: FrameId,
    /// Resident page, `INVALID_PAGE_ID` while the frame holds none.
    page_id: AtomicU32,
    pin_count: AtomicUsize,
    is_dirty: AtomicBool,
    latch: RwLatch,
    page: UnsafeCell<Page>,
}

// SAFETY: the UnsafeCell'd buffer is only dereferenced under `latch`
// (shared for reads, exclusive for writes); everything else is atomic.
unsafe impl Send for FrameHeader {}
unsafe impl Sync for FrameHeader {}

impl FrameHeader {
    pub(crate) fn new(frame_id: FrameId) -> Self {
        FrameHeader {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicUsize::new(0),
            is_dirty: AtomicBool::new(false),
            latch: RwLatch::default(),
            page: UnsafeCell::new(Page::new_empty()),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn latch(&self) -> &RwLatch {
        &self.latch
    }

    /// Increment the pin count, returning the new value. The caller must
    /// hold the replacer mutex so the 0 -> 1 transition and the matching
    /// evictability update cannot interleave with `release_pin`.
    pub(crate) fn pin(&self) -> usize {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn unpin(&self) -> usize {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin on frame {} with pin count 0", self.frame_id);
        prev - 1
    }

    pub(crate) fn page_ptr(&self) -> NonNull<Page> {
        NonNull::new(self.page.get()).expect("frame buffer pointer is null")
    }

    /// # Safety
    ///
    /// The caller holds `latch` in shared or exclusive mode.
    pub(crate) unsafe fn page(&self) -> &Page {
        &*self.page.get()
    }

    /// # Safety
    ///
    /// The caller holds `latch` in exclusive mode.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn page_mut(&self) -> &mut Page {
        &mut *self.page.get()
    }

    /// Return the frame to its empty state.
    ///
    /// # Safety
    ///
    /// The caller holds `latch` in exclusive mode and the frame is no longer
    /// reachable through the page table.
    pub(crate) unsafe fn reset(&self) {
        self.page_mut().zero_out();
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}

/// Drop one pin and, on the 1 -> 0 transition, hand the frame back to the
/// replacer. The replacer mutex is held across the whole transition so a
/// concurrent pin under the pool latch cannot slip between the decrement and
/// the evictability update and end up with a pinned-but-evictable frame.
pub(crate) fn release_pin(frame: &FrameHeader, replacer: &Mutex<LruKReplacer>) {
    let mut replacer = replacer.lock().unwrap();
    if frame.unpin() == 0 {
        replacer.set_evictable(frame.frame_id(), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fresh_frame_is_empty() {
        let frame = FrameHeader::new(3);
        assert_eq!(frame.frame_id(), 3);
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.latch().is_locked());
    }

    #[test]
    fn test_release_pin_marks_evictable_at_zero() {
        let frame = Arc::new(FrameHeader::new(0));
        let replacer = Mutex::new(LruKReplacer::new(1, 2));
        {
            let mut replacer = replacer.lock().unwrap();
            replacer.record_access(0);
            frame.pin();
            frame.pin();
        }

        release_pin(&frame, &replacer);
        assert_eq!(frame.pin_count(), 1);
        assert_eq!(replacer.lock().unwrap().size(), 0);

        release_pin(&frame, &replacer);
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(replacer.lock().unwrap().size(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let frame = FrameHeader::new(0);
        frame.latch().exclusive();
        frame.set_page_id(7);
        frame.set_dirty(true);
        // SAFETY: exclusive latch held.
        unsafe {
            frame.page_mut()[0] = 42;
            frame.reset();
            assert_eq!(frame.page()[0], 0);
        }
        frame.latch().release_exclusive();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert!(!frame.is_dirty());
        assert_eq!(frame.pin_count(), 0);
    }
}
