//! Deferred index flushing
//!
//! Writing `index.json` on every mutation would dominate small writes, so
//! requests are throttled: at most one flush per interval, plus one trailing
//! flush after a burst ends. The scheduler only decides; the database
//! performs the write and arms the retry timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// What the caller should do after asking for a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// A flush is already pending or none is needed
    Skip,

    /// Write the snapshot now
    FlushNow,

    /// Ask again after the retry delay
    Defer(Duration),
}

/// Throttle state for index snapshots
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Duration,
    retry_delay: Duration,
    last_flush: Mutex<Option<Instant>>,
    pending: AtomicBool,
    flushes: AtomicU64,
}

impl FlushScheduler {
    pub fn new(interval: Duration, retry_delay: Duration) -> Self {
        Self {
            interval,
            retry_delay,
            last_flush: Mutex::new(None),
            pending: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
        }
    }

    /// Called after every mutation
    pub fn request(&self) -> FlushAction {
        if self.pending.swap(true, Ordering::AcqRel) {
            return FlushAction::Skip;
        }
        self.poll()
    }

    /// Called when a deferred check fires
    pub fn poll(&self) -> FlushAction {
        if !self.pending.load(Ordering::Acquire) {
            return FlushAction::Skip;
        }
        let mut last_flush = self.last_flush.lock();
        let due = last_flush.map_or(true, |at| at.elapsed() > self.interval);
        if due {
            *last_flush = Some(Instant::now());
            self.pending.store(false, Ordering::Release);
            FlushAction::FlushNow
        } else {
            FlushAction::Defer(self.retry_delay)
        }
    }

    /// Record a snapshot written outside the throttle (explicit flush, cleanup)
    pub fn mark_flushed(&self) {
        *self.last_flush.lock() = Some(Instant::now());
        self.pending.store(false, Ordering::Release);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a snapshot written after `FlushAction::FlushNow`
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Snapshots written so far
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}
