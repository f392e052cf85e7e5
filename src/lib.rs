pub mod bp;
pub mod disk;

mod logger;
mod page;
mod rwlatch;

pub use page::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

pub mod prelude {
    pub use crate::bp::{
        get_test_bp, BufferPoolManager, FrameId, LruKReplacer, ReadPageGuard, Replacer,
        WritePageGuard,
    };
    pub use crate::disk::{
        DiskCompletion, DiskManager, DiskRequest, DiskScheduler, FileDiskManager, InMemDiskManager,
    };
    pub use crate::page::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
}
