use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ExecuteError;

/// Tracks bytes held by table builders against an optional limit.
#[derive(Debug, Default)]
pub struct Allocator {
    limit: Option<usize>,
    allocated: AtomicUsize,
    max_allocated: AtomicUsize,
}

impl Allocator {
    /// A limit of zero or less means unlimited.
    pub fn new(limit: i64) -> Self {
        Self {
            limit: usize::try_from(limit).ok().filter(|l| *l > 0),
            ..Default::default()
        }
    }

    pub fn allocate(&self, bytes: usize) -> Result<(), ExecuteError> {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let next = current + bytes;
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(ExecuteError::MemoryLimit {
                        requested: bytes,
                        allocated: current,
                        limit,
                    });
                }
            }
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.max_allocated.fetch_max(next, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn free(&self, bytes: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |c| Some(c.saturating_sub(bytes)));
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn max_allocated(&self) -> usize {
        self.max_allocated.load(Ordering::Relaxed)
    }
}
