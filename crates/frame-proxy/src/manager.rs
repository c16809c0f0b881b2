//! The proxy device lifecycle and the public entry points.
//!
//! [`ProxyDeviceManager`] owns the proxy device, its immediate context and an
//! optional flip-model swapchain, and drives the [`FrameCopyEngine`] either
//! from the host's render thread ([`ProxyDeviceManager::copy_frame_from_game_thread`])
//! or from a background thread ([`ProxyDeviceManager::start_copy_thread`]).
//!
//! Every public operation reports failure as `false` and logs. Structural
//! operations serialize on the copy-thread slot, then the state mutex;
//! counters are atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use gpu_interop::format::color_space_for_format;
use gpu_interop::{
    ColorSpace, GpuBackend, PixelFormat, PollBudget, PresentParams, SwapChainDesc, WindowHandle,
};

use crate::color_space;
use crate::copy_engine::{FrameCopyEngine, FrameReport, ProxyTarget};
use crate::copy_thread::CopyThread;
use crate::error::{ErrorClass, ProxyError, ProxyResult};
use crate::settings::{ProxySettings, SettingsSource};
use crate::stats::{Counters, ProxyStats};
use crate::throttle::LogThrottle;
use crate::throttled_warn;

struct ProxyState<B: GpuBackend> {
    device: Option<B::Device>,
    context: Option<B::Context>,
    factory: Option<B::Factory>,
    swap_chain: Option<B::SwapChain>,
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    /// The swapchain switched `format` to match the source backbuffer.
    format_from_source: bool,
    color_space: Option<ColorSpace>,
    /// Swapchain was created with tearing allowed.
    tearing: bool,
    initialized: bool,
}

impl<B: GpuBackend> ProxyState<B> {
    fn empty() -> Self {
        Self {
            device: None,
            context: None,
            factory: None,
            swap_chain: None,
            width: 0,
            height: 0,
            format: None,
            format_from_source: false,
            color_space: None,
            tearing: false,
            initialized: false,
        }
    }
}

/// Proxy handles cloned out of the state for one frame.
struct FrameHandles<B: GpuBackend> {
    device: B::Device,
    context: B::Context,
    swap_chain: B::SwapChain,
    present: PresentParams,
}

struct Inner<B: GpuBackend> {
    backend: B,
    settings: RwLock<Arc<dyn SettingsSource>>,
    state: Mutex<ProxyState<B>>,
    engine: Mutex<FrameCopyEngine<B>>,
    counters: Counters,
    thread_running: AtomicBool,
    frame_throttle: LogThrottle,
    /// A non-retryable frame error was already logged.
    frame_refused: AtomicBool,
}

impl<B: GpuBackend> Inner<B> {
    fn settings(&self) -> ProxySettings {
        self.settings.read().snapshot()
    }

    /// One frame from either entry point.
    fn frame(&self, source: &B::SwapChain) -> bool {
        if !self.settings().enabled {
            return false;
        }
        match self.run_frame(source) {
            Ok(report) => {
                let was_refused = self.frame_refused.swap(false, Ordering::AcqRel);
                if was_refused || self.frame_throttle.count() > 0 {
                    info!("Frame copy recovered ({:?})", report.path);
                    self.frame_throttle.reset();
                }
                true
            }
            Err(e) if e.is_retryable() => {
                throttled_warn!(self.frame_throttle, "Frame copy failed: {e}");
                false
            }
            Err(e) => {
                if !self.frame_refused.swap(true, Ordering::AcqRel) {
                    error!("Frame copy cannot proceed: {e}");
                }
                false
            }
        }
    }

    fn run_frame(&self, source: &B::SwapChain) -> ProxyResult<FrameReport> {
        let handles = self.frame_handles()?;

        let (report, color_space, presented) = {
            let mut engine = self.engine.lock();
            let target = ProxyTarget {
                device: &handles.device,
                context: &handles.context,
                swap_chain: &handles.swap_chain,
            };
            let report = engine.copy_frame(&self.backend, &target, source)?;
            let color_space = report
                .reformatted_to
                .and_then(|format| self.follow_format(&handles.swap_chain, format));
            let presented = engine.present(&self.backend, &handles.swap_chain, handles.present);
            (report, color_space, presented)
        };
        Counters::bump(&self.counters.frames_copied);

        if report.resized_to.is_some() || report.reformatted_to.is_some() {
            let mut state = self.state.lock();
            if let Some((width, height)) = report.resized_to {
                state.width = width;
                state.height = height;
            }
            if let Some(format) = report.reformatted_to {
                state.format = Some(format);
                state.format_from_source = true;
            }
            if color_space.is_some() {
                state.color_space = color_space;
            }
        }

        presented?;
        Counters::bump(&self.counters.frames_presented);
        Ok(report)
    }

    /// Color space for a swapchain that just switched to `format`.
    fn follow_format(&self, swap_chain: &B::SwapChain, format: PixelFormat) -> Option<ColorSpace> {
        match color_space::apply(&self.backend, swap_chain, color_space_for_format(format)) {
            Ok(applied) => Some(applied),
            Err(e) => {
                warn!("Proxy swapchain keeps its color space after switching to {format:?}: {e}");
                None
            }
        }
    }

    fn frame_handles(&self) -> ProxyResult<FrameHandles<B>> {
        let state = self.state.lock();
        if !state.initialized {
            return Err(ProxyError::NotInitialized);
        }
        Ok(FrameHandles {
            device: state.device.clone().ok_or(ProxyError::NotReady("device"))?,
            context: state.context.clone().ok_or(ProxyError::NotReady("context"))?,
            swap_chain: state.swap_chain.clone().ok_or(ProxyError::NotReady("swapchain"))?,
            present: PresentParams::for_tearing(state.tearing),
        })
    }

    fn build(
        &self,
        state: &mut ProxyState<B>,
        settings: &ProxySettings,
        window: Option<WindowHandle>,
        width: u32,
        height: u32,
        create_swapchain: bool,
    ) -> ProxyResult<()> {
        let (device, context) = self
            .backend
            .create_device(settings.debug_mode)
            .map_err(ProxyError::DeviceCreation)?;
        debug!("Proxy device created (debug layer: {})", settings.debug_mode);

        state.device = Some(device);
        state.context = Some(context);
        state.width = width;
        state.height = height;
        state.format = Some(settings.output_format());
        state.initialized = true;

        if let (true, Some(window)) = (create_swapchain, window) {
            if let Err(e) = self.create_swap_chain(state, settings, window) {
                warn!("Proxy swapchain unavailable, continuing in device-only mode: {e:#}");
            }
        }
        Ok(())
    }

    fn create_swap_chain(
        &self,
        state: &mut ProxyState<B>,
        settings: &ProxySettings,
        window: WindowHandle,
    ) -> anyhow::Result<()> {
        let device = state
            .device
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no proxy device"))?;
        let factory = self.backend.create_factory()?;
        let tearing = settings.allow_tearing && self.backend.supports_tearing(&factory);
        if settings.allow_tearing && !tearing {
            info!("Tearing requested but not supported, presenting with vsync");
        }

        let desc = SwapChainDesc {
            width: state.width,
            height: state.height,
            format: settings.output_format(),
            buffer_count: settings.buffer_count,
            allow_tearing: tearing,
        };
        let swap_chain = self.backend.create_swap_chain(&factory, device, window, &desc)?;
        info!(
            "Proxy swapchain created: {}x{} {:?}, {} buffers, tearing {}",
            desc.width, desc.height, desc.format, desc.buffer_count, tearing
        );

        match color_space::apply(&self.backend, &swap_chain, settings.output_color_space()) {
            Ok(applied) => state.color_space = Some(applied),
            Err(e) => warn!("Proxy swapchain keeps its default color space: {e}"),
        }

        state.factory = Some(factory);
        state.swap_chain = Some(swap_chain);
        state.tearing = tearing;
        Ok(())
    }

    /// Release everything in reverse creation order. The copy thread must
    /// already be joined; `source` is the reference it was holding.
    fn teardown(&self, state: &mut ProxyState<B>, source: Option<B::SwapChain>) {
        self.engine.lock().release();
        drop(source);
        drop(state.swap_chain.take());
        drop(state.factory.take());
        drop(state.context.take());
        drop(state.device.take());
        *state = ProxyState::empty();
        self.frame_throttle.reset();
        self.frame_refused.store(false, Ordering::Release);
        Counters::bump(&self.counters.shutdown_count);
    }
}

/// Owns the proxy device and bridges frames from a source swapchain into it.
pub struct ProxyDeviceManager<B: GpuBackend> {
    inner: Arc<Inner<B>>,
    copy_thread: Mutex<Option<CopyThread<B>>>,
}

impl<B: GpuBackend> ProxyDeviceManager<B> {
    pub fn new(backend: B, settings: impl SettingsSource) -> Self {
        let settings: Arc<dyn SettingsSource> = Arc::new(settings);
        Self {
            inner: Arc::new(Inner {
                backend,
                settings: RwLock::new(settings),
                state: Mutex::new(ProxyState::empty()),
                engine: Mutex::new(FrameCopyEngine::default()),
                counters: Counters::default(),
                thread_running: AtomicBool::new(false),
                frame_throttle: LogThrottle::default(),
                frame_refused: AtomicBool::new(false),
            }),
            copy_thread: Mutex::new(None),
        }
    }

    /// Replace where settings are read from. Takes effect on the next call.
    pub fn set_settings(&self, settings: impl SettingsSource) {
        let settings: Arc<dyn SettingsSource> = Arc::new(settings);
        *self.inner.settings.write() = settings;
    }

    /// Bound on each per-frame fence wait.
    pub fn set_poll_budget(&self, budget: PollBudget) {
        self.inner.engine.lock().set_poll_budget(budget);
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Create the proxy device and, if requested, a swapchain for `window`.
    ///
    /// Re-initializes if already initialized. Swapchain failure falls back to
    /// device-only mode and still returns true.
    pub fn initialize(
        &self,
        window: Option<WindowHandle>,
        width: u32,
        height: u32,
        create_swapchain: bool,
    ) -> bool {
        if create_swapchain {
            if let Err(e) = validate_swapchain_args(window, width, height) {
                warn!("Initialize rejected: {e}");
                return false;
            }
        }

        let settings = self.inner.settings();
        let mut slot = self.copy_thread.lock();
        let source = self.stop_thread(&mut slot);
        let mut state = self.inner.state.lock();
        if state.initialized {
            info!("Proxy already initialized, reinitializing");
            self.inner.teardown(&mut state, source);
        }

        match self
            .inner
            .build(&mut state, &settings, window, width, height, create_swapchain)
        {
            Ok(()) => {
                Counters::bump(&self.inner.counters.init_count);
                info!(
                    "Proxy initialized: {}x{} {:?}, swapchain: {}",
                    width,
                    height,
                    state.format,
                    state.swap_chain.is_some()
                );
                true
            }
            Err(e) => {
                error!("Proxy initialization failed: {e}");
                *state = ProxyState::empty();
                false
            }
        }
    }

    /// Stop the copy thread and release every proxy object. No-op when not
    /// initialized.
    pub fn shutdown(&self) {
        let mut slot = self.copy_thread.lock();
        let source = self.stop_thread(&mut slot);
        let mut state = self.inner.state.lock();
        if !state.initialized {
            return;
        }
        self.inner.teardown(&mut state, source);
        info!("Proxy shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    pub fn device(&self) -> Option<B::Device> {
        self.inner.state.lock().device.clone()
    }

    pub fn context(&self) -> Option<B::Context> {
        self.inner.state.lock().context.clone()
    }

    pub fn swap_chain(&self) -> Option<B::SwapChain> {
        self.inner.state.lock().swap_chain.clone()
    }

    /// Color space last applied to the proxy swapchain.
    pub fn output_color_space(&self) -> Option<ColorSpace> {
        self.inner.state.lock().color_space
    }

    pub fn stats(&self) -> ProxyStats {
        let counters = &self.inner.counters;
        let state = self.inner.state.lock();
        ProxyStats {
            frames_generated: Counters::read(&counters.frames_generated),
            frames_copied: Counters::read(&counters.frames_copied),
            frames_presented: Counters::read(&counters.frames_presented),
            init_count: Counters::read(&counters.init_count),
            shutdown_count: Counters::read(&counters.shutdown_count),
            is_initialized: state.initialized,
            copy_thread_running: self.is_copy_thread_running(),
            width: state.width,
            height: state.height,
            format: state.format,
            has_swapchain: state.swap_chain.is_some(),
        }
    }

    /// Copy `source`'s current backbuffer into the proxy and present it.
    ///
    /// Call once per frame from the host's present hook.
    pub fn copy_frame_from_game_thread(&self, source: &B::SwapChain) -> bool {
        self.inner.frame(source)
    }

    /// Run the copy from a background thread instead. No-op returning true if
    /// already running.
    pub fn start_copy_thread(&self, source: &B::SwapChain) -> bool {
        let mut slot = self.copy_thread.lock();
        if slot.is_some() {
            debug!("Copy thread already running");
            return true;
        }

        let device = {
            let state = self.inner.state.lock();
            if !state.initialized {
                warn!("Cannot start copy thread: {}", ProxyError::NotInitialized);
                return false;
            }
            state.device.clone()
        };
        let Some(device) = device else {
            warn!("Cannot start copy thread: {}", ProxyError::NotReady("device"));
            return false;
        };

        let path = self.inner.engine.lock().prepare(&self.inner.backend, &device, source);
        match path {
            Ok(path) => debug!("Copy thread will use the {path:?} path"),
            Err(e) => {
                error!("Cannot start copy thread: {e}");
                return false;
            }
        }

        let inner = self.inner.clone();
        match CopyThread::spawn(source.clone(), move |source| {
            inner.frame(source);
        }) {
            Ok(thread) => {
                *slot = Some(thread);
                self.inner.thread_running.store(true, Ordering::Release);
                info!("Copy thread started");
                true
            }
            Err(e) => {
                error!("{e}");
                self.inner.engine.lock().release();
                false
            }
        }
    }

    pub fn stop_copy_thread(&self) {
        let mut slot = self.copy_thread.lock();
        if self.stop_thread(&mut slot).is_some() {
            info!("Copy thread stopped");
        }
    }

    pub fn is_copy_thread_running(&self) -> bool {
        self.inner.thread_running.load(Ordering::Acquire)
    }

    /// Apply the configured output color space to the proxy swapchain.
    ///
    /// Once the swapchain has switched to the source's format, the color
    /// space of that format is applied instead.
    pub fn set_output_color_space(&self) -> bool {
        let configured = self.inner.settings().output_color_space();
        let (swap_chain, target) = {
            let state = self.inner.state.lock();
            let target = match state.format {
                Some(format) if state.format_from_source => color_space_for_format(format),
                _ => configured,
            };
            (state.swap_chain.clone(), target)
        };
        let Some(swap_chain) = swap_chain else {
            warn!("Cannot set output color space: {}", ProxyError::NotReady("swapchain"));
            return false;
        };
        match color_space::apply(&self.inner.backend, &swap_chain, target) {
            Ok(applied) => {
                self.inner.state.lock().color_space = Some(applied);
                true
            }
            Err(e) => {
                log_color_space_failure("Output", &e);
                false
            }
        }
    }

    /// Apply the configured output color space to the source swapchain.
    pub fn set_source_color_space(&self, source: &B::SwapChain) -> bool {
        let target = self.inner.settings().output_color_space();
        match color_space::apply(&self.inner.backend, source, target) {
            Ok(_) => true,
            Err(e) => {
                log_color_space_failure("Source", &e);
                false
            }
        }
    }

    pub fn increment_frame_generated(&self) {
        Counters::bump(&self.inner.counters.frames_generated);
    }

    /// Join the copy thread if any; returns the source reference it held.
    ///
    /// Takes the locked slot so callers keep it across whatever follows.
    fn stop_thread(&self, slot: &mut Option<CopyThread<B>>) -> Option<B::SwapChain> {
        let mut thread = slot.take()?;
        let source = thread.stop();
        self.inner.thread_running.store(false, Ordering::Release);
        source
    }
}

impl<B: GpuBackend> Drop for ProxyDeviceManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(target_os = "windows")]
impl ProxyDeviceManager<gpu_interop::dx11::Dx11Backend> {
    /// Manager over the Direct3D 11 backend.
    pub fn dx11(settings: impl SettingsSource) -> Self {
        Self::new(gpu_interop::dx11::Dx11Backend, settings)
    }
}

fn log_color_space_failure(side: &str, e: &ProxyError) {
    match e.class() {
        ErrorClass::Degraded => warn!("{side} {e}"),
        _ => error!("{side} {e}"),
    }
}

fn validate_swapchain_args(
    window: Option<WindowHandle>,
    width: u32,
    height: u32,
) -> ProxyResult<()> {
    if window.map_or(true, |w| w.0 == 0) {
        return Err(ProxyError::InvalidArgument("swapchain requested without a window".into()));
    }
    if width == 0 || height == 0 {
        return Err(ProxyError::InvalidArgument(format!(
            "swapchain requested with zero size {width}x{height}"
        )));
    }
    Ok(())
}
