use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[allow(unused_imports)]
use crate::{log_debug, log_trace};

use crate::bp::frame::{release_pin, FrameHeader, FrameId};
use crate::bp::page_guard::{ReadPageGuard, WritePageGuard};
use crate::bp::replacer::{LruKReplacer, Replacer};
use crate::disk::disk_manager::DiskManager;
use crate::disk::disk_scheduler::{DiskCompletion, DiskRequest, DiskScheduler, IoStats};
use crate::page::{PageId, INVALID_PAGE_ID};

/// Bookkeeping protected by the pool latch: which page lives in which frame,
/// and the FIFO list of frames that hold none.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_frames: VecDeque<FrameId>,
}

/// An in-memory cache of fixed-size pages backed by a disk manager.
///
/// Page data is only reachable through [`ReadPageGuard`] / [`WritePageGuard`]
/// handles, which pin their frame and hold its latch for their lifetime.
/// Misses bring the page in from disk, evicting an LRU-K victim when no
/// frame is free; dirty victims are written back first.
///
/// Locking order is pool latch, then frame latch; the pool latch is released
/// before any I/O wait, so misses on distinct pages proceed in parallel. A
/// thread must never take the pool latch while holding a frame latch.
pub struct BufferPoolManager {
    num_frames: usize,
    next_page_id: AtomicU32,
    frames: Vec<Arc<FrameHeader>>,
    pool: Mutex<PoolState>,
    replacer: Arc<Mutex<LruKReplacer>>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, disk_manager: Arc<dyn DiskManager>, k_dist: usize) -> Self {
        assert!(num_frames > 0, "buffer pool needs at least one frame");
        let frames = (0..num_frames)
            .map(|i| Arc::new(FrameHeader::new(i as FrameId)))
            .collect();
        let free_frames = (0..num_frames as FrameId).collect();
        BufferPoolManager {
            num_frames,
            next_page_id: AtomicU32::new(0),
            frames,
            pool: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(num_frames),
                free_frames,
            }),
            replacer: Arc::new(Mutex::new(LruKReplacer::new(num_frames, k_dist))),
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Number of frames this pool manages.
    pub fn size(&self) -> usize {
        self.num_frames
    }

    /// I/O counters of the underlying scheduler.
    pub fn io_stats(&self) -> &IoStats {
        self.disk_scheduler.stats()
    }

    /// Allocate a fresh page id and reserve disk space for it. The page is
    /// not brought into memory. Never fails.
    pub fn new_page(&self) -> PageId {
        let _pool = self.pool.lock().unwrap();
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        assert_ne!(page_id, INVALID_PAGE_ID, "page id space exhausted");
        self.disk_scheduler.increase_disk_space(page_id);
        page_id
    }

    /// Shared access to `page_id`, bringing it in from disk if necessary.
    /// `None` if every frame is pinned.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<ReadPageGuard> {
        let mut pool = self.pool.lock().unwrap();

        if let Some(&frame_id) = pool.page_table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id as usize]);
            self.pin_resident(frame_id, &frame);
            drop(pool);
            log_trace!("read hit on page {page_id} in frame {frame_id}");
            return Some(ReadPageGuard::acquire(
                page_id,
                frame,
                Arc::clone(&self.replacer),
            ));
        }

        let (guard, victim_flush) = self.reserve_frame(&mut pool, page_id)?;
        drop(pool);
        self.load_page(&guard, page_id, victim_flush);
        Some(guard.downgrade())
    }

    /// Exclusive access to `page_id`, bringing it in from disk if necessary.
    /// `None` if every frame is pinned.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<WritePageGuard> {
        let mut pool = self.pool.lock().unwrap();

        if let Some(&frame_id) = pool.page_table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id as usize]);
            self.pin_resident(frame_id, &frame);
            drop(pool);
            log_trace!("write hit on page {page_id} in frame {frame_id}");
            return Some(WritePageGuard::acquire(
                page_id,
                frame,
                Arc::clone(&self.replacer),
            ));
        }

        let (guard, victim_flush) = self.reserve_frame(&mut pool, page_id)?;
        drop(pool);
        self.load_page(&guard, page_id, victim_flush);
        Some(guard)
    }

    /// Like [`checked_read_page`](Self::checked_read_page), but treats
    /// out-of-frames as fatal.
    pub fn read_page(&self, page_id: PageId) -> ReadPageGuard {
        match self.checked_read_page(page_id) {
            Some(guard) => guard,
            None => panic!("failed to bring in page {page_id}: all frames are pinned"),
        }
    }

    /// Like [`checked_write_page`](Self::checked_write_page), but treats
    /// out-of-frames as fatal.
    pub fn write_page(&self, page_id: PageId) -> WritePageGuard {
        match self.checked_write_page(page_id) {
            Some(guard) => guard,
            None => panic!("failed to bring in page {page_id}: all frames are pinned"),
        }
    }

    /// Remove `page_id` from memory and release its disk region. Returns
    /// `false` if the page is resident and pinned; `true` otherwise,
    /// including when the page is not resident at all.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut pool = self.pool.lock().unwrap();
        let Some(&frame_id) = pool.page_table.get(&page_id) else {
            return true;
        };
        let frame = Arc::clone(&self.frames[frame_id as usize]);
        if frame.pin_count() > 0 {
            return false;
        }
        pool.page_table.remove(&page_id);

        // Pin count zero means no guard holds the latch, and a flusher
        // cannot either: flushing pins the frame under the pool latch we
        // are holding. Only a dropping guard's final latch release can make
        // this wait, and only briefly.
        frame.latch().exclusive();
        if frame.is_dirty() {
            log_debug!("flushing page {page_id} before deletion");
            let (request, completion) = DiskRequest::write(page_id, frame.page_ptr());
            self.disk_scheduler.schedule(request);
            if !completion.wait() {
                panic!("disk write of deleted page {page_id} failed");
            }
        }
        self.disk_scheduler.deallocate(page_id);
        // SAFETY: exclusive latch held and the page-table entry is gone.
        unsafe { frame.reset() };
        frame.latch().release_exclusive();

        pool.free_frames.push_back(frame_id);
        // Forget the frame's access history so a free frame can never be
        // handed out by the replacer.
        self.replacer.lock().unwrap().remove(frame_id);
        true
    }

    /// Write `page_id` back to disk if it is resident and dirty. Returns
    /// `false` when the page is absent or already clean.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let frame = {
            let pool = self.pool.lock().unwrap();
            let Some(&frame_id) = pool.page_table.get(&page_id) else {
                return false;
            };
            let frame = Arc::clone(&self.frames[frame_id as usize]);
            // Internal pin: keeps the frame resident while the pool latch is
            // dropped for the flush I/O.
            let mut replacer = self.replacer.lock().unwrap();
            if frame.pin() == 1 {
                replacer.set_evictable(frame_id, false);
            }
            frame
        };

        frame.latch().shared();
        let flushed = if frame.is_dirty() {
            let (request, completion) = DiskRequest::write(page_id, frame.page_ptr());
            self.disk_scheduler.schedule(request);
            if !completion.wait() {
                panic!("disk write of page {page_id} failed");
            }
            frame.set_dirty(false);
            true
        } else {
            false
        };
        release_pin(&frame, &self.replacer);
        frame.latch().release_shared();
        flushed
    }

    /// Flush every resident page. Best-effort: the resident set is
    /// snapshotted once, and pages brought in afterwards are not covered.
    pub fn flush_all_pages(&self) {
        let page_ids: Vec<PageId> = {
            let pool = self.pool.lock().unwrap();
            pool.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id);
        }
    }

    /// Pin count of `page_id`, or `None` if the page is not resident.
    /// Thread-safe; meant for tests and introspection.
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        let pool = self.pool.lock().unwrap();
        let &frame_id = pool.page_table.get(&page_id)?;
        Some(self.frames[frame_id as usize].pin_count())
    }

    /// Pin a resident frame and record the access. Runs under the pool
    /// latch; the replacer mutex makes the 0 -> 1 transition atomic with the
    /// evictability update.
    fn pin_resident(&self, frame_id: FrameId, frame: &FrameHeader) {
        let mut replacer = self.replacer.lock().unwrap();
        replacer.record_access(frame_id);
        if frame.pin() == 1 {
            replacer.set_evictable(frame_id, false);
        }
    }

    /// Obtain a frame for `page_id` while holding the pool latch: free list
    /// first, replacer victim otherwise. On success the frame is pinned,
    /// exclusively latched (late arrivers for `page_id` block on the latch
    /// instead of observing a half-loaded buffer), and mapped in the page
    /// table. A dirty victim's write-back is already enqueued, so any later
    /// read of the victim page is ordered behind it in the scheduler queue;
    /// the returned completion still has to be awaited.
    ///
    /// `None` means no frame could be obtained: every frame is pinned.
    fn reserve_frame(
        &self,
        pool: &mut PoolState,
        page_id: PageId,
    ) -> Option<(WritePageGuard, Option<DiskCompletion>)> {
        let frame_id = match pool.free_frames.pop_front() {
            Some(frame_id) => frame_id,
            None => self.replacer.lock().unwrap().evict()?,
        };
        let frame = Arc::clone(&self.frames[frame_id as usize]);

        // The frame has pin count zero, so no guard or flusher holds its
        // latch (see delete_page); at worst a dropping guard is between its
        // unpin and its latch release.
        frame.latch().exclusive();

        let victim_flush = match frame.page_id() {
            INVALID_PAGE_ID => None,
            victim_id => {
                pool.page_table.remove(&victim_id);
                if frame.is_dirty() {
                    log_debug!("evicting dirty page {victim_id} from frame {frame_id}");
                    let (request, completion) = DiskRequest::write(victim_id, frame.page_ptr());
                    self.disk_scheduler.schedule(request);
                    Some(completion)
                } else {
                    None
                }
            }
        };

        pool.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);

        {
            let mut replacer = self.replacer.lock().unwrap();
            replacer.record_access(frame_id);
            frame.pin();
            replacer.set_evictable(frame_id, false);
        }

        Some((
            WritePageGuard::from_latched(page_id, frame, Arc::clone(&self.replacer)),
            victim_flush,
        ))
    }

    /// Finish a reservation outside the pool latch: wait out the victim's
    /// write-back, then read `page_id` into the frame. The caller's guard
    /// holds the frame's exclusive latch throughout.
    fn load_page(
        &self,
        guard: &WritePageGuard,
        page_id: PageId,
        victim_flush: Option<DiskCompletion>,
    ) {
        let frame = guard.frame();

        if let Some(completion) = victim_flush {
            if !completion.wait() {
                panic!("disk write of evicted page failed");
            }
            frame.set_dirty(false);
        }

        let (request, completion) = DiskRequest::read(page_id, frame.page_ptr());
        self.disk_scheduler.schedule(request);
        if !completion.wait() {
            panic!("disk read of page {page_id} failed");
        }
        frame.set_dirty(false);
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        // Pages still covered by a live write guard are the guard holder's
        // problem; everything reachable is written back.
        self.flush_all_pages();
    }
}

#[cfg(test)]
impl BufferPoolManager {
    pub fn run_checks(&self) {
        let pool = self.pool.lock().unwrap();
        for (&page_id, &frame_id) in &pool.page_table {
            assert_eq!(
                self.frames[frame_id as usize].page_id(),
                page_id,
                "page table and frame disagree"
            );
        }
        for &frame_id in &pool.free_frames {
            let frame = &self.frames[frame_id as usize];
            assert_eq!(frame.page_id(), INVALID_PAGE_ID);
            assert_eq!(frame.pin_count(), 0);
            assert!(!frame.is_dirty());
        }
        assert!(pool.page_table.len() + pool.free_frames.len() <= self.num_frames);
    }
}
