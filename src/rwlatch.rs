use std::sync::atomic::{AtomicI32, Ordering};

/// Reader-writer latch backed by a single atomic counter.
///
/// `0` means free, `n > 0` means `n` shared holders, `-1` means one
/// exclusive holder. Acquisition spins briefly and then yields; fairness is
/// not guaranteed. Release is not tied to a thread, so a latch may be
/// acquired on one thread and released on another (guards rely on this).
pub struct RwLatch {
    cnt: AtomicI32,
}

impl Default for RwLatch {
    fn default() -> Self {
        RwLatch {
            cnt: AtomicI32::new(0),
        }
    }
}

impl RwLatch {
    pub fn is_shared(&self) -> bool {
        self.cnt.load(Ordering::Relaxed) > 0
    }

    pub fn is_exclusive(&self) -> bool {
        self.cnt.load(Ordering::Relaxed) < 0
    }

    pub fn is_locked(&self) -> bool {
        self.cnt.load(Ordering::Relaxed) != 0
    }

    pub fn try_shared(&self) -> bool {
        let mut expected = self.cnt.load(Ordering::Relaxed);
        loop {
            if expected < 0 {
                return false;
            }
            match self.cnt.compare_exchange_weak(
                expected,
                expected + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => expected = observed,
            }
        }
    }

    pub fn shared(&self) {
        let mut attempt = 0u32;
        while !self.try_shared() {
            backoff(&mut attempt);
        }
    }

    pub fn try_exclusive(&self) -> bool {
        self.cnt
            .compare_exchange(0, -1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn exclusive(&self) {
        let mut attempt = 0u32;
        while !self.try_exclusive() {
            backoff(&mut attempt);
        }
    }

    pub fn release_shared(&self) {
        let prev = self.cnt.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "release_shared without a shared holder");
    }

    pub fn release_exclusive(&self) {
        let prev = self.cnt.swap(0, Ordering::Release);
        debug_assert_eq!(prev, -1, "release_exclusive without the exclusive holder");
    }

    /// Exclusive to shared, with no window for another writer in between.
    pub fn downgrade(&self) {
        let prev = self.cnt.swap(1, Ordering::AcqRel);
        debug_assert_eq!(prev, -1, "downgrade without the exclusive holder");
    }
}

fn backoff(attempt: &mut u32) {
    if *attempt < 64 {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *attempt = attempt.saturating_add(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;
    use std::thread;

    #[test]
    fn test_shared_is_reentrant_across_holders() {
        let latch = RwLatch::default();
        latch.shared();
        assert!(latch.try_shared());
        assert!(!latch.try_exclusive());
        latch.release_shared();
        latch.release_shared();
        assert!(!latch.is_locked());
    }

    #[test]
    fn test_exclusive_excludes_everyone() {
        let latch = RwLatch::default();
        latch.exclusive();
        assert!(latch.is_exclusive());
        assert!(!latch.try_shared());
        assert!(!latch.try_exclusive());
        latch.release_exclusive();
        assert!(latch.try_shared());
        latch.release_shared();
    }

    #[test]
    fn test_downgrade() {
        let latch = RwLatch::default();
        latch.exclusive();
        latch.downgrade();
        assert!(latch.is_shared());
        assert!(latch.try_shared());
        assert!(!latch.try_exclusive());
        latch.release_shared();
        latch.release_shared();
        assert!(!latch.is_locked());
    }

    #[test]
    fn test_exclusive_protects_data() {
        struct Cell {
            latch: RwLatch,
            value: UnsafeCell<u64>,
        }

        unsafe impl Sync for Cell {}

        let cell = Cell {
            latch: RwLatch::default(),
            value: UnsafeCell::new(0),
        };

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let cell = &cell;
                    for _ in 0..1000 {
                        cell.latch.exclusive();
                        // SAFETY: the exclusive latch is held.
                        unsafe { *cell.value.get() += 1 };
                        cell.latch.release_exclusive();
                    }
                });
            }
        });

        cell.latch.shared();
        // SAFETY: the shared latch is held and all writers have joined.
        assert_eq!(unsafe { *cell.value.get() }, 4000);
        cell.latch.release_shared();
    }
}
