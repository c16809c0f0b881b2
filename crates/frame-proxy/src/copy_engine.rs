//! Per-frame copy from the source backbuffer to the proxy backbuffer.
//!
//! When the source and proxy devices differ the copy goes through the shared
//! texture in three strictly ordered steps:
//!
//! 1. On the source device: open the shared handle (cached), copy the source
//!    backbuffer into it, flush.
//! 2. End an event query on the source context, flush, and poll it (yielding
//!    between polls) until the GPU reports the copy done.
//! 3. On the proxy device: copy the shared texture into the proxy backbuffer,
//!    flush, then present.
//!
//! Step 3 never starts unless step 2 observed the fence signaled. That is the
//! only thing stopping the proxy from reading a half-written shared texture.
//!
//! When both sides are the same device the shared texture and fence are
//! skipped and a single device-local copy is issued.
//!
//! The proxy swapchain follows the source backbuffer: a different size or
//! pixel format recreates its buffers before the copy.
//!
//! Once [`FrameCopyEngine::prepare`] has run for a cross-device source, steps
//! 1 and 2 hold the source context's critical section, because the host's
//! render thread records on that same context.

use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use gpu_interop::{
    CompletionFence, GpuBackend, PixelFormat, PollBudget, PresentParams, SharedResourceBridge,
    TextureDesc, WaitOutcome,
};

use crate::error::{ProxyError, ProxyResult};

/// Sleep used in place of the fence when the event query can't be created.
pub const DEGRADED_FENCE_SLEEP: Duration = Duration::from_millis(2);

/// The proxy side of a frame copy.
pub struct ProxyTarget<'a, B: GpuBackend> {
    pub device: &'a B::Device,
    pub context: &'a B::Context,
    pub swap_chain: &'a B::SwapChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPath {
    /// Source and proxy are different devices; goes through the shared texture.
    CrossDevice,
    /// Source backbuffer belongs to the proxy device itself.
    SameDevice,
}

/// How step 2 was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    /// Not needed (same-device copy).
    Skipped,
    Signaled { polls: u64 },
    /// No event query available; slept [`DEGRADED_FENCE_SLEEP`] instead.
    Slept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub path: CopyPath,
    pub fence: FenceWait,
    /// New proxy backbuffer size if the proxy swapchain had to follow the
    /// source size this frame.
    pub resized_to: Option<(u32, u32)>,
    /// New proxy buffer format if the proxy swapchain had to follow the
    /// source format this frame.
    pub reformatted_to: Option<PixelFormat>,
}

/// Holds a context's critical section until dropped.
struct ContextLock<'a, B: GpuBackend> {
    backend: &'a B,
    context: &'a B::Context,
}

impl<'a, B: GpuBackend> ContextLock<'a, B> {
    fn enter(backend: &'a B, context: &'a B::Context) -> Self {
        backend.lock_context(context);
        Self { backend, context }
    }
}

impl<B: GpuBackend> Drop for ContextLock<'_, B> {
    fn drop(&mut self) {
        self.backend.unlock_context(self.context);
    }
}

pub struct FrameCopyEngine<B: GpuBackend> {
    bridge: SharedResourceBridge<B>,
    fence: CompletionFence<B>,
    budget: PollBudget,
    degraded_sleep: Duration,
    degraded_logged: bool,
    /// Source context is shared with another thread; lock it for steps 1-2.
    lock_source: bool,
}

impl<B: GpuBackend> Default for FrameCopyEngine<B> {
    fn default() -> Self {
        Self::new(PollBudget::default())
    }
}

impl<B: GpuBackend> FrameCopyEngine<B> {
    pub fn new(budget: PollBudget) -> Self {
        Self {
            bridge: SharedResourceBridge::new(),
            fence: CompletionFence::new(),
            budget,
            degraded_sleep: DEGRADED_FENCE_SLEEP,
            degraded_logged: false,
            lock_source: false,
        }
    }

    pub fn with_degraded_sleep(mut self, sleep: Duration) -> Self {
        self.degraded_sleep = sleep;
        self
    }

    pub fn set_poll_budget(&mut self, budget: PollBudget) {
        self.budget = budget;
    }

    pub fn bridge(&self) -> &SharedResourceBridge<B> {
        &self.bridge
    }

    /// Look at the source once, before frames are copied from a thread other
    /// than the host's render thread, and set up whatever the copy path needs.
    ///
    /// For a cross-device source this turns on locking for the source context
    /// and creates the shared texture. On failure no shared texture is left.
    pub fn prepare(
        &mut self,
        backend: &B,
        proxy_device: &B::Device,
        source: &B::SwapChain,
    ) -> ProxyResult<CopyPath> {
        let (source_device, desc) = {
            let buffer = backend.back_buffer(source).map_err(ProxyError::SourceUnavailable)?;
            let device = backend.texture_device(&buffer).map_err(ProxyError::SourceUnavailable)?;
            (device, backend.texture_desc(&buffer))
        };

        if backend.same_device(&source_device, proxy_device) {
            debug!("Source swapchain belongs to the proxy device, no shared resource needed");
            return Ok(CopyPath::SameDevice);
        }

        let source_context = backend
            .immediate_context(&source_device)
            .map_err(ProxyError::SourceUnavailable)?;
        backend
            .protect_context(&source_context)
            .map_err(ProxyError::SourceUnavailable)?;
        self.lock_source = true;

        if !self.bridge.matches(&desc) {
            self.bridge
                .initialize_with_desc(backend, proxy_device, &desc)
                .map_err(ProxyError::SharedResource)?;
            info!(
                "Shared resource ready for cross-device copy ({}x{} {:?})",
                desc.width, desc.height, desc.format
            );
        }
        Ok(CopyPath::CrossDevice)
    }

    /// Copy the current source backbuffer into the proxy backbuffer.
    ///
    /// Does not present; see [`Self::present`].
    pub fn copy_frame(
        &mut self,
        backend: &B,
        proxy: &ProxyTarget<'_, B>,
        source: &B::SwapChain,
    ) -> ProxyResult<FrameReport> {
        let source_buffer = backend
            .back_buffer(source)
            .map_err(ProxyError::SourceUnavailable)?;
        let source_desc = backend.texture_desc(&source_buffer);
        let source_device = backend
            .texture_device(&source_buffer)
            .map_err(ProxyError::SourceUnavailable)?;

        let (proxy_buffer, previous) =
            self.proxy_buffer_for(backend, proxy.swap_chain, &source_desc)?;
        let resized_to = previous
            .filter(|p| p.dimensions() != source_desc.dimensions())
            .map(|_| source_desc.dimensions());
        let reformatted_to = previous
            .filter(|p| p.format != source_desc.format)
            .map(|_| source_desc.format);

        if backend.same_device(&source_device, proxy.device) {
            backend.copy_texture(proxy.context, &proxy_buffer, &source_buffer);
            backend.flush(proxy.context);
            return Ok(FrameReport {
                path: CopyPath::SameDevice,
                fence: FenceWait::Skipped,
                resized_to,
                reformatted_to,
            });
        }

        if !self.bridge.matches(&source_desc) {
            if self.bridge.is_initialized() {
                info!(
                    "Source backbuffer changed to {}x{} {:?}, recreating shared texture",
                    source_desc.width, source_desc.height, source_desc.format
                );
            }
            self.bridge
                .initialize_with_desc(backend, proxy.device, &source_desc)
                .map_err(ProxyError::SharedResource)?;
        }

        let source_context = backend
            .immediate_context(&source_device)
            .map_err(ProxyError::SourceUnavailable)?;
        let fence = {
            let _lock = self
                .lock_source
                .then(|| ContextLock::enter(backend, &source_context));

            // Step 1: source backbuffer -> shared texture, on the source device.
            {
                let opened = self
                    .bridge
                    .open_on(backend, &source_device)
                    .map_err(ProxyError::SharedResource)?;
                backend.copy_texture(&source_context, opened.texture(), &source_buffer);
            }
            backend.flush(&source_context);

            // Step 2: wait until the GPU has finished that copy.
            self.wait_for_source(backend, &source_device, &source_context)?
        };

        // Step 3: shared texture -> proxy backbuffer, on the proxy device.
        let shared = self.bridge.owned().ok_or_else(|| {
            ProxyError::SharedResource(anyhow!("shared texture vanished mid-frame"))
        })?;
        backend.copy_texture(proxy.context, &proxy_buffer, shared.texture());
        backend.flush(proxy.context);

        Ok(FrameReport {
            path: CopyPath::CrossDevice,
            fence,
            resized_to,
            reformatted_to,
        })
    }

    pub fn present(
        &self,
        backend: &B,
        swap_chain: &B::SwapChain,
        params: PresentParams,
    ) -> ProxyResult<()> {
        backend.present(swap_chain, params).map_err(ProxyError::Present)
    }

    /// Release the shared texture (both sides) and the fence.
    pub fn release(&mut self) {
        self.bridge.cleanup();
        self.fence.release();
        self.degraded_logged = false;
        self.lock_source = false;
    }

    /// Proxy backbuffer matching the source's size and format.
    ///
    /// When either differs the proxy swapchain buffers are recreated to match
    /// and the previous description is returned alongside. A copy can't
    /// convert formats, so a source format no swapchain can take is refused.
    fn proxy_buffer_for(
        &self,
        backend: &B,
        swap_chain: &B::SwapChain,
        source_desc: &TextureDesc,
    ) -> ProxyResult<(B::Texture, Option<TextureDesc>)> {
        let buffer = backend
            .back_buffer(swap_chain)
            .map_err(ProxyError::Backend)?;
        let desc = backend.texture_desc(&buffer);
        if desc == *source_desc {
            return Ok((buffer, None));
        }
        if desc.format != source_desc.format && !source_desc.format.is_presentable() {
            return Err(ProxyError::UnsupportedFormat(source_desc.format));
        }

        // ResizeBuffers needs every backbuffer reference released first.
        drop(buffer);
        backend
            .resize_swap_chain(swap_chain, source_desc)
            .map_err(ProxyError::Backend)?;
        if desc.format != source_desc.format {
            warn!(
                "Source backbuffer is {:?}, proxy swapchain switched from {:?} to match",
                source_desc.format, desc.format
            );
        }
        if desc.dimensions() != source_desc.dimensions() {
            info!(
                "Proxy swapchain resized to {}x{} to follow the source",
                source_desc.width, source_desc.height
            );
        }
        let buffer = backend
            .back_buffer(swap_chain)
            .map_err(ProxyError::Backend)?;
        Ok((buffer, Some(desc)))
    }

    fn wait_for_source(
        &mut self,
        backend: &B,
        device: &B::Device,
        context: &B::Context,
    ) -> ProxyResult<FenceWait> {
        if let Err(e) = self.fence.ensure(backend, device) {
            if !self.degraded_logged {
                warn!(
                    "Completion fence unavailable, falling back to a {:?} sleep per frame: {e:#}",
                    self.degraded_sleep
                );
                self.degraded_logged = true;
            }
            std::thread::sleep(self.degraded_sleep);
            return Ok(FenceWait::Slept);
        }

        self.fence.signal(backend, context)?;
        match self.fence.wait(backend, context, self.budget)? {
            WaitOutcome::Signaled { polls } => Ok(FenceWait::Signaled { polls }),
            WaitOutcome::Exhausted { polls } => Err(ProxyError::FenceTimeout { polls }),
        }
    }
}
