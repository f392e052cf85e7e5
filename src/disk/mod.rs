pub mod disk_manager;
pub mod disk_scheduler;

pub use disk_manager::{DiskManager, FileDiskManager, InMemDiskManager};
pub use disk_scheduler::{DiskCompletion, DiskRequest, DiskScheduler, IoStats};
