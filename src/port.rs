//! External port allocation for parallel test workers.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::PortError;

/// Source of external ports for new routes.
///
/// Implementations must never hand out the same port twice, including
/// across parallel workers sharing one router.
pub trait PortAllocator: Send + Sync {
    fn next(&self) -> Result<u16, PortError>;
}

/// Hands out ports from a per-worker slice of a shared range.
///
/// Worker `i` owns `[base + i * span, base + (i + 1) * span)`, so workers
/// built with the same `base` and `span` never collide.
#[derive(Debug)]
pub struct WorkerPortAllocator {
    worker: u16,
    start: u16,
    span: u16,
    cursor: AtomicU32,
}

impl WorkerPortAllocator {
    pub fn new(base: u16, span: u16, worker: u16) -> Result<Self, PortError> {
        if span == 0 {
            return Err(PortError::InvalidRange("span must be > 0".into()));
        }
        let start = u32::from(base) + u32::from(worker) * u32::from(span);
        let end = start + u32::from(span) - 1;
        if end > u32::from(u16::MAX) {
            return Err(PortError::InvalidRange(format!(
                "worker {worker} range {start}..={end} exceeds {}",
                u16::MAX
            )));
        }
        Ok(Self {
            worker,
            start: start as u16,
            span,
            cursor: AtomicU32::new(0),
        })
    }

    pub fn worker(&self) -> u16 {
        self.worker
    }

    /// First and last port of this worker's slice.
    pub fn range(&self) -> (u16, u16) {
        (self.start, self.start + (self.span - 1))
    }
}

impl PortAllocator for WorkerPortAllocator {
    fn next(&self) -> Result<u16, PortError> {
        let offset = self.cursor.fetch_add(1, Ordering::Relaxed);
        if offset >= u32::from(self.span) {
            let (start, end) = self.range();
            return Err(PortError::Exhausted {
                worker: self.worker,
                start,
                end,
            });
        }
        Ok(self.start + offset as u16)
    }
}
