//! Frame counters and the statistics snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use gpu_interop::PixelFormat;

/// Point-in-time view of the proxy, returned by
/// [`ProxyDeviceManager::stats`](crate::ProxyDeviceManager::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStats {
    /// Frames the host's present hook processed.
    pub frames_generated: u64,
    /// Frames copied into the proxy backbuffer.
    pub frames_copied: u64,
    /// Frames the proxy swapchain presented.
    pub frames_presented: u64,
    pub init_count: u64,
    pub shutdown_count: u64,
    pub is_initialized: bool,
    pub copy_thread_running: bool,
    pub width: u32,
    pub height: u32,
    /// Output format of the proxy, `None` before the first initialize.
    pub format: Option<PixelFormat>,
    pub has_swapchain: bool,
}

/// Monotonic counters bumped from the hot path without taking a lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_generated: AtomicU64,
    pub frames_copied: AtomicU64,
    pub frames_presented: AtomicU64,
    pub init_count: AtomicU64,
    pub shutdown_count: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
