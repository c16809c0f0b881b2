#![allow(dead_code)]

use std::time::{Duration, Instant};

use frame_proxy::{PixelFormat, ProxyDeviceManager, ProxySettings, SettingsSource, WindowHandle};
use gpu_interop::fake::{Event, FakeBackend, FakeContext, FakeDevice, FakeSwapChain};
use gpu_interop::{GpuBackend, TextureDesc};

pub const WINDOW: WindowHandle = WindowHandle(0x1234);
pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;
/// Output format for the default selector.
pub const FORMAT: PixelFormat = PixelFormat::Rgb10A2Unorm;

/// A manager over the fake backend plus a source renderer on its own device.
pub struct Harness {
    pub backend: FakeBackend,
    pub manager: ProxyDeviceManager<FakeBackend>,
    pub source_device: FakeDevice,
    /// Held so the source device keeps a single immediate context.
    pub source_context: FakeContext,
    pub source: FakeSwapChain,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ProxySettings::default())
    }

    pub fn with_settings(settings: impl SettingsSource) -> Self {
        let backend = FakeBackend::new();
        let manager = ProxyDeviceManager::new(backend.clone(), settings);
        let (source_device, source_context) = backend.create_device(false).unwrap();
        let source = backend
            .create_source_swap_chain(&source_device, TextureDesc::new(WIDTH, HEIGHT, FORMAT));
        Self {
            backend,
            manager,
            source_device,
            source_context,
            source,
        }
    }

    /// Initialize with a 1920x1080 swapchain.
    pub fn initialized() -> Self {
        let h = Self::new();
        assert!(h.manager.initialize(Some(WINDOW), WIDTH, HEIGHT, true));
        h
    }

    pub fn proxy_device_id(&self) -> u64 {
        self.manager.device().unwrap().id()
    }

    pub fn source_with(&self, desc: TextureDesc) -> FakeSwapChain {
        self.backend.create_source_swap_chain(&self.source_device, desc)
    }
}

/// Poll `condition` for up to five seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Calls that touch a device or swapchain, as opposed to object lifetime.
pub fn is_backend_call(event: &Event) -> bool {
    matches!(
        event,
        Event::BackBuffer { .. }
            | Event::OpenShared { .. }
            | Event::Copy { .. }
            | Event::CopyRejected { .. }
            | Event::Flush { .. }
            | Event::EndQuery { .. }
            | Event::QuerySignaled { .. }
            | Event::Present { .. }
            | Event::Resize { .. }
            | Event::ContextProtected { .. }
            | Event::ContextLocked { .. }
            | Event::ContextUnlocked { .. }
    )
}
