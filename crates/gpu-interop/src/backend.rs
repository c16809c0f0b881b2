//! Common interface for cross-device texture bridging.

use anyhow::Result;

use crate::format::{ColorSpace, PixelFormat};

/// Size and format of a 2D texture or swapchain buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Parameters for a proxy presentation swapchain.
///
/// Swapchains are always flip-model; `allow_tearing` must only be set when the
/// factory reported tearing support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub allow_tearing: bool,
}

/// Process-wide handle of an exported shareable texture.
///
/// The value is owned by the driver. Nothing in this crate closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub usize);

/// Raw native window handle (an `HWND` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// How a frame should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentParams {
    pub sync_interval: u32,
    pub allow_tearing: bool,
}

impl PresentParams {
    /// Immediate present with tearing when the swapchain allows it,
    /// vsync otherwise.
    pub fn for_tearing(tearing_enabled: bool) -> Self {
        if tearing_enabled {
            Self {
                sync_interval: 0,
                allow_tearing: true,
            }
        } else {
            Self {
                sync_interval: 1,
                allow_tearing: false,
            }
        }
    }
}

/// Common interface over a graphics API used by the frame bridge.
///
/// The associated types are reference-counted handles: cloning one is a cheap
/// reference bump and dropping the last clone releases the underlying object.
/// Implementations exist for Direct3D 11 on Windows ([`crate::dx11`]) and for
/// an instrumented in-memory fake used by tests (`fake` feature).
///
/// The source and proxy sides of the bridge use the same backend: the source
/// swapchain is whatever the host's interception layer hands us, and its
/// device is discovered through [`GpuBackend::texture_device`]. The source's
/// immediate context also belongs to the host's render thread, so work issued
/// on it from elsewhere goes through [`GpuBackend::lock_context`].
pub trait GpuBackend: Send + Sync + 'static {
    type Device: Clone + Send + Sync;
    type Context: Clone + Send + Sync;
    type Factory: Clone + Send + Sync;
    type SwapChain: Clone + Send + Sync;
    type Texture: Clone + Send + Sync;
    /// GPU event query used as a completion fence.
    type Query: Send + Sync;

    // -- Device lifecycle -----------------------------------------------------

    /// Create a device and its immediate context.
    fn create_device(&self, debug: bool) -> Result<(Self::Device, Self::Context)>;

    /// Create the factory used for swapchain creation.
    fn create_factory(&self) -> Result<Self::Factory>;

    /// Whether presenting with tearing (variable refresh) is supported.
    fn supports_tearing(&self, factory: &Self::Factory) -> bool;

    /// Create a flip-model swapchain for `window`.
    fn create_swap_chain(
        &self,
        factory: &Self::Factory,
        device: &Self::Device,
        window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain>;

    /// Recreate all swapchain buffers with `desc`'s size and format.
    fn resize_swap_chain(&self, swap_chain: &Self::SwapChain, desc: &TextureDesc) -> Result<()>;

    /// Whether two device handles refer to the same device object.
    fn same_device(&self, a: &Self::Device, b: &Self::Device) -> bool;

    /// Immediate context of `device`.
    fn immediate_context(&self, device: &Self::Device) -> Result<Self::Context>;

    /// Turn on the API's own locking for `context`, which a thread we don't
    /// control also records commands on.
    fn protect_context(&self, context: &Self::Context) -> Result<()>;

    /// Enter `context`'s critical section. Only meaningful after
    /// [`Self::protect_context`].
    fn lock_context(&self, context: &Self::Context);

    fn unlock_context(&self, context: &Self::Context);

    // -- Textures -------------------------------------------------------------

    /// Buffer 0 of a swapchain.
    fn back_buffer(&self, swap_chain: &Self::SwapChain) -> Result<Self::Texture>;

    fn texture_desc(&self, texture: &Self::Texture) -> TextureDesc;

    /// Device that owns `texture`.
    fn texture_device(&self, texture: &Self::Texture) -> Result<Self::Device>;

    /// Create a texture that can be exported through [`Self::shared_handle`].
    fn create_shared_texture(&self, device: &Self::Device, desc: &TextureDesc)
        -> Result<Self::Texture>;

    fn shared_handle(&self, texture: &Self::Texture) -> Result<SharedHandle>;

    /// Import a texture exported by another device.
    fn open_shared_texture(&self, device: &Self::Device, handle: SharedHandle)
        -> Result<Self::Texture>;

    // -- Commands -------------------------------------------------------------

    /// Device-local full-resource copy. Both textures must belong to the
    /// context's device and have matching size and format.
    fn copy_texture(&self, context: &Self::Context, dst: &Self::Texture, src: &Self::Texture);

    /// Submit queued commands to the GPU.
    fn flush(&self, context: &Self::Context);

    fn present(&self, swap_chain: &Self::SwapChain, params: PresentParams) -> Result<()>;

    // -- Synchronization ------------------------------------------------------

    fn create_event_query(&self, device: &Self::Device) -> Result<Self::Query>;

    /// Insert the query into the context's command stream.
    fn end_query(&self, context: &Self::Context, query: &Self::Query);

    /// Non-blocking check of a previously ended query.
    ///
    /// Returns `Ok(false)` while the GPU is still working and an error when
    /// the device was lost.
    fn query_signaled(&self, context: &Self::Context, query: &Self::Query) -> Result<bool>;

    // -- Color space ----------------------------------------------------------

    /// Whether the swapchain can present in `color_space`.
    fn supports_color_space(&self, swap_chain: &Self::SwapChain, color_space: ColorSpace) -> bool;

    fn set_color_space(&self, swap_chain: &Self::SwapChain, color_space: ColorSpace)
        -> Result<()>;
}
