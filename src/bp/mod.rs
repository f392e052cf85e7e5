mod buffer_pool;
mod frame;
mod page_guard;
mod replacer;

pub use buffer_pool::BufferPoolManager;
pub use frame::{FrameHeader, FrameId};
pub use page_guard::{ReadPageGuard, WritePageGuard};
pub use replacer::{LruKReplacer, Replacer};

use std::sync::Arc;

use crate::disk::disk_manager::InMemDiskManager;

/// Backward k-distance the test pools use.
pub const TEST_K_DIST: usize = 2;

/// Buffer pool backed by an in-memory disk, used for testing and benches.
pub fn get_test_bp(num_frames: usize) -> Arc<BufferPoolManager> {
    Arc::new(BufferPoolManager::new(
        num_frames,
        Arc::new(InMemDiskManager::new()),
        TEST_K_DIST,
    ))
}
