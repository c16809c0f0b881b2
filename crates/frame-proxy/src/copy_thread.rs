//! Background copy loop for hosts that can't call the per-frame entry point
//! from their render thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error};

use gpu_interop::GpuBackend;

use crate::error::{ProxyError, ProxyResult};

/// Pause between iterations of the loop.
pub const COPY_THREAD_IDLE: Duration = Duration::from_millis(1);

pub(crate) struct CopyThread<B: GpuBackend> {
    stop_flag: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
    /// Keeps the source swapchain alive for as long as the loop may touch it.
    source: Option<B::SwapChain>,
}

impl<B: GpuBackend> CopyThread<B> {
    /// Run `frame` against `source` until stopped.
    pub fn spawn<F>(source: B::SwapChain, frame: F) -> ProxyResult<Self>
    where
        F: Fn(&B::SwapChain) + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = stop_flag.clone();
        let thread_source = source.clone();

        let join_handle = std::thread::Builder::new()
            .name("frame-proxy-copy".to_string())
            .spawn(move || {
                debug!("Copy thread started");
                while !stop.load(Ordering::Acquire) {
                    frame(&thread_source);
                    std::thread::sleep(COPY_THREAD_IDLE);
                }
                debug!("Copy thread exiting");
            })
            .map_err(|e| ProxyError::Backend(anyhow::anyhow!("failed to spawn copy thread: {e}")))?;

        Ok(Self {
            stop_flag,
            join_handle: Some(join_handle),
            source: Some(source),
        })
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// Hands back the source reference so the caller decides when it is
    /// released. `None` if already stopped.
    pub fn stop(&mut self) -> Option<B::SwapChain> {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                error!("Copy thread panicked");
            }
        }
        self.source.take()
    }
}

impl<B: GpuBackend> Drop for CopyThread<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
