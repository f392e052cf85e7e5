use std::fs::{File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use libc::{c_void, fsync, ftruncate, pread, pwrite, O_DIRECT};

#[allow(unused_imports)]
use crate::log_trace;
use crate::page::{Page, PageId, PAGE_SIZE};

/// Block-device abstraction the disk scheduler drives.
///
/// Page id `N` occupies bytes `[N * PAGE_SIZE, (N + 1) * PAGE_SIZE)` on the
/// backing store. Reads and writes are synchronous, blocking and
/// whole-page. Implementations are shared across the scheduler worker and
/// the pool threads, hence `Send + Sync`.
pub trait DiskManager: Send + Sync {
    /// Read page `page_id` into `page`. The id must be within the space
    /// reserved by `extend_to`.
    fn read_page(&self, page_id: PageId, page: &mut Page) -> io::Result<()>;

    /// Write `page` out to page `page_id`.
    fn write_page(&self, page_id: PageId, page: &Page) -> io::Result<()>;

    /// Make pages `0..=page_id` addressable.
    fn extend_to(&self, page_id: PageId) -> io::Result<()>;

    /// Recycling hook: the region of `page_id` is no longer in use.
    fn deallocate_page(&self, page_id: PageId) -> io::Result<()>;

    /// Number of pages the store can currently address.
    fn num_pages(&self) -> usize;

    /// Persist buffered writes.
    fn flush(&self) -> io::Result<()>;
}

/// Disk manager over a single file, driven through `pread`/`pwrite` on the
/// raw descriptor.
pub struct FileDiskManager {
    _path: PathBuf,
    _file: File, // When this file is dropped, the descriptor (file_no) goes invalid.
    file_no: i32,
}

impl FileDiskManager {
    /// Open (or create) `path`, going through the kernel page cache.
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open(path, false)
    }

    /// Open (or create) `path` with `O_DIRECT`. Page buffers are
    /// 4096-aligned, which satisfies the alignment direct I/O requires.
    pub fn with_direct_io<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open(path, true)
    }

    fn open<P: AsRef<Path>>(path: P, direct: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(false);
        if direct {
            options.custom_flags(O_DIRECT);
        }
        let file = options.open(&path)?;
        let file_no = file.as_raw_fd();
        Ok(FileDiskManager {
            _path: path,
            _file: file,
            file_no,
        })
    }

    fn file_len(&self) -> usize {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        let ret = unsafe { libc::fstat(self.file_no, stat.as_mut_ptr()) };
        if ret == -1 {
            return 0;
        }
        let stat = unsafe { stat.assume_init() };
        stat.st_size as usize
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, page: &mut Page) -> io::Result<()> {
        log_trace!("reading page {} from {:?}", page_id, self._path);
        unsafe {
            let ret = pread(
                self.file_no,
                page.get_raw_bytes_mut().as_mut_ptr() as *mut c_void,
                PAGE_SIZE,
                page_id as i64 * PAGE_SIZE as i64,
            );
            if ret != PAGE_SIZE as isize {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> io::Result<()> {
        log_trace!("writing page {} to {:?}", page_id, self._path);
        unsafe {
            let ret = pwrite(
                self.file_no,
                page.get_raw_bytes().as_ptr() as *const c_void,
                PAGE_SIZE,
                page_id as i64 * PAGE_SIZE as i64,
            );
            if ret != PAGE_SIZE as isize {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn extend_to(&self, page_id: PageId) -> io::Result<()> {
        let wanted = (page_id as usize + 1) * PAGE_SIZE;
        if self.file_len() >= wanted {
            return Ok(());
        }
        let ret = unsafe { ftruncate(self.file_no, wanted as i64) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn deallocate_page(&self, _page_id: PageId) -> io::Result<()> {
        // On-disk space recycling is out of scope; ids are never reused.
        Ok(())
    }

    fn num_pages(&self) -> usize {
        self.file_len() / PAGE_SIZE
    }

    fn flush(&self) -> io::Result<()> {
        if unsafe { fsync(self.file_no) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// In-memory disk manager for tests and ephemeral pools.
///
/// `deallocate_page` zeroes the region, so deleted pages read back empty.
pub struct InMemDiskManager {
    pages: Mutex<Vec<Box<Page>>>,
}

impl InMemDiskManager {
    pub fn new() -> Self {
        InMemDiskManager {
            pages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn out_of_range(page_id: PageId) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("page {page_id} is beyond the reserved space"),
    )
}

impl DiskManager for InMemDiskManager {
    fn read_page(&self, page_id: PageId, page: &mut Page) -> io::Result<()> {
        let pages = self.pages.lock().unwrap();
        let src = pages
            .get(page_id as usize)
            .ok_or_else(|| out_of_range(page_id))?;
        page.get_raw_bytes_mut().copy_from_slice(src.get_raw_bytes());
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> io::Result<()> {
        let mut pages = self.pages.lock().unwrap();
        let dst = pages
            .get_mut(page_id as usize)
            .ok_or_else(|| out_of_range(page_id))?;
        dst.get_raw_bytes_mut().copy_from_slice(page.get_raw_bytes());
        Ok(())
    }

    fn extend_to(&self, page_id: PageId) -> io::Result<()> {
        let mut pages = self.pages.lock().unwrap();
        while pages.len() <= page_id as usize {
            pages.push(Box::new(Page::new_empty()));
        }
        Ok(())
    }

    fn deallocate_page(&self, page_id: PageId) -> io::Result<()> {
        let mut pages = self.pages.lock().unwrap();
        if let Some(page) = pages.get_mut(page_id as usize) {
            page.zero_out();
        }
        Ok(())
    }

    fn num_pages(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
