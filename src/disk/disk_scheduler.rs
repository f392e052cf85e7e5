use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

#[allow(unused_imports)]
use crate::log_trace;
use crate::disk::disk_manager::DiskManager;
use crate::page::{Page, PageId};

/// One page-sized I/O request, processed by the scheduler worker.
pub struct DiskRequest {
    is_write: bool,
    page_id: PageId,
    data: NonNull<Page>,
    done: Sender<bool>,
}

// SAFETY: the buffer pointer is dereferenced only by the worker thread, and
// only while the producer keeps the owning frame latched (exclusive for
// reads, at least shared for writes) and blocks on the completion. The
// completion channel provides the release/acquire edge for the bytes.
unsafe impl Send for DiskRequest {}

impl DiskRequest {
    /// Read page `page_id` from disk into `data`.
    pub fn read(page_id: PageId, data: NonNull<Page>) -> (Self, DiskCompletion) {
        let (done, rx) = mpsc::channel();
        (
            DiskRequest {
                is_write: false,
                page_id,
                data,
                done,
            },
            DiskCompletion { rx },
        )
    }

    /// Write `data` out to page `page_id`.
    pub fn write(page_id: PageId, data: NonNull<Page>) -> (Self, DiskCompletion) {
        let (done, rx) = mpsc::channel();
        (
            DiskRequest {
                is_write: true,
                page_id,
                data,
                done,
            },
            DiskCompletion { rx },
        )
    }
}

/// One-shot completion signal for a scheduled request.
pub struct DiskCompletion {
    rx: Receiver<bool>,
}

impl DiskCompletion {
    /// Block until the request has been processed. `false` reports an I/O
    /// failure, or a scheduler that shut down with the request unprocessed.
    pub fn wait(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }
}

/// Counters of requests the worker has processed.
pub struct IoStats {
    read_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl IoStats {
    fn new() -> Self {
        IoStats {
            read_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::Acquire)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Acquire)
    }

    fn inc_read(&self) {
        self.read_count.fetch_add(1, Ordering::AcqRel);
    }

    fn inc_write(&self) {
        self.write_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// Decouples the buffer pool from the block device.
///
/// Requests go onto an unbounded FIFO queue; a single background worker
/// performs them against the disk manager in order and fires each request's
/// completion. All requests for a given page are therefore totally ordered
/// by enqueue order. Dropping the scheduler enqueues a sentinel; the worker
/// drains everything before it and exits, and the drop joins it.
pub struct DiskScheduler {
    disk_manager: Arc<dyn DiskManager>,
    request_tx: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<IoStats>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<dyn DiskManager>) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let stats = Arc::new(IoStats::new());
        let worker = {
            let disk_manager = Arc::clone(&disk_manager);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("disk-scheduler".to_string())
                .spawn(move || Self::worker_loop(request_rx, disk_manager, stats))
                .expect("failed to spawn the disk scheduler worker")
        };
        DiskScheduler {
            disk_manager,
            request_tx,
            worker: Some(worker),
            stats,
        }
    }

    fn worker_loop(
        rx: Receiver<Option<DiskRequest>>,
        disk_manager: Arc<dyn DiskManager>,
        stats: Arc<IoStats>,
    ) {
        while let Ok(Some(mut request)) = rx.recv() {
            let ok = if request.is_write {
                stats.inc_write();
                log_trace!("worker writing page {}", request.page_id);
                // SAFETY: see the Send impl on DiskRequest.
                let page = unsafe { request.data.as_ref() };
                disk_manager.write_page(request.page_id, page).is_ok()
            } else {
                stats.inc_read();
                log_trace!("worker reading page {}", request.page_id);
                // SAFETY: see the Send impl on DiskRequest.
                let page = unsafe { request.data.as_mut() };
                disk_manager.read_page(request.page_id, page).is_ok()
            };
            // The producer may have given up on the completion; that is fine.
            let _ = request.done.send(ok);
        }
    }

    /// Enqueue `request`. Never blocks the producer.
    pub fn schedule(&self, request: DiskRequest) {
        self.request_tx
            .send(Some(request))
            .expect("disk scheduler worker has shut down");
    }

    /// Make pages `0..=page_id` addressable on the backing store.
    /// Synchronous.
    pub fn increase_disk_space(&self, page_id: PageId) {
        self.disk_manager
            .extend_to(page_id)
            .expect("failed to reserve disk space");
    }

    /// Release the on-disk region of `page_id` (recycling hook).
    pub fn deallocate(&self, page_id: PageId) {
        self.disk_manager
            .deallocate_page(page_id)
            .expect("failed to deallocate page");
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_tx.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::disk_manager::InMemDiskManager;

    fn make_scheduler() -> (DiskScheduler, Arc<InMemDiskManager>) {
        let dm = Arc::new(InMemDiskManager::new());
        (DiskScheduler::new(Arc::clone(&dm) as Arc<dyn DiskManager>), dm)
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (scheduler, _dm) = make_scheduler();
        scheduler.increase_disk_space(0);

        let mut src = Box::new(Page::new_empty());
        src[0] = 42;
        let (request, completion) = DiskRequest::write(0, NonNull::from(src.as_mut()));
        scheduler.schedule(request);
        assert!(completion.wait());

        let mut dst = Box::new(Page::new_empty());
        let (request, completion) = DiskRequest::read(0, NonNull::from(dst.as_mut()));
        scheduler.schedule(request);
        assert!(completion.wait());
        assert_eq!(dst[0], 42);

        assert_eq!(scheduler.stats().read_count(), 1);
        assert_eq!(scheduler.stats().write_count(), 1);
    }

    #[test]
    fn test_same_page_requests_are_fifo() {
        let (scheduler, _dm) = make_scheduler();
        scheduler.increase_disk_space(0);

        // Enqueue the write and the read back to back; only then wait. The
        // single worker must process them in order.
        let mut src = Box::new(Page::new_empty());
        src[7] = 9;
        let (write, write_done) = DiskRequest::write(0, NonNull::from(src.as_mut()));

        let mut dst = Box::new(Page::new_empty());
        let (read, read_done) = DiskRequest::read(0, NonNull::from(dst.as_mut()));

        scheduler.schedule(write);
        scheduler.schedule(read);
        assert!(write_done.wait());
        assert!(read_done.wait());
        assert_eq!(dst[7], 9);
    }

    #[test]
    fn test_failed_io_reports_false() {
        let (scheduler, _dm) = make_scheduler();
        // Page 0 was never reserved, so the read must fail.
        let mut dst = Box::new(Page::new_empty());
        let (request, completion) = DiskRequest::read(0, NonNull::from(dst.as_mut()));
        scheduler.schedule(request);
        assert!(!completion.wait());
    }

    #[test]
    fn test_shutdown_drains_queued_requests() {
        let dm = Arc::new(InMemDiskManager::new());
        let mut src = Box::new(Page::new_empty());
        src[0] = 5;
        {
            let scheduler = DiskScheduler::new(Arc::clone(&dm) as Arc<dyn DiskManager>);
            scheduler.increase_disk_space(0);
            let (request, completion) = DiskRequest::write(0, NonNull::from(src.as_mut()));
            scheduler.schedule(request);
            // Drop without waiting: the sentinel sits behind the request, so
            // the worker still performs it before joining.
            drop(completion);
        }
        let mut out = Page::new_empty();
        dm.read_page(0, &mut out).unwrap();
        assert_eq!(out[0], 5);
    }
}
