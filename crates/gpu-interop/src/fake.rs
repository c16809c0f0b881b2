//! Instrumented in-memory [`GpuBackend`] for tests.
//!
//! Every handle is reference counted like a COM object and records a
//! [`Event::Released`] entry in the shared journal when its last clone is
//! dropped. Backend calls are journaled too, so tests can assert ordering
//! (e.g. that no proxy-side copy happens before the fence signals, or that
//! the copy thread stopped before any device object was released).
//!
//! Failures are injected per operation with [`FakeBackend::fail`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;

use crate::backend::{
    GpuBackend, PresentParams, SharedHandle, SwapChainDesc, TextureDesc, WindowHandle,
};
use crate::format::ColorSpace;

/// Kind and id of a fake object, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Object {
    Device(u64),
    Context(u64),
    Factory(u64),
    SwapChain(u64),
    Texture(u64),
    Query(u64),
}

/// One journal entry. Device ids identify which device a call ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Created(Object),
    Released(Object),
    BackBuffer { swap_chain: u64 },
    OpenShared { device: u64 },
    Copy { device: u64 },
    CopyRejected { device: u64 },
    Flush { device: u64 },
    EndQuery { device: u64 },
    QuerySignaled { device: u64 },
    Present { swap_chain: u64, sync_interval: u32, allow_tearing: bool },
    Resize { swap_chain: u64, desc: TextureDesc },
    ContextProtected { device: u64 },
    ContextLocked { device: u64 },
    ContextUnlocked { device: u64 },
    SetColorSpace { swap_chain: u64, color_space: ColorSpace },
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    DeviceCreation,
    FactoryCreation,
    SwapChainCreation,
    BackBuffer,
    SharedTextureCreation,
    SharedHandle,
    OpenShared,
    QueryCreation,
    /// Queries stay unsignaled forever.
    QueryNeverSignals,
    /// Polling a query reports a lost device.
    QueryError,
    Present,
    Resize,
    ContextProtection,
}

type Journal = Arc<Mutex<Vec<Event>>>;

/// Records [`Event::Released`] when the owning handle's last clone drops.
#[derive(Debug)]
struct Tracked {
    object: Object,
    journal: Journal,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.journal.lock().push(Event::Released(self.object));
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DeviceInner {
    id: u64,
    /// The immediate context is owned by whoever received it from
    /// `create_device`; the device only remembers it.
    context: Mutex<Weak<ContextInner>>,
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
pub struct FakeDevice(Arc<DeviceInner>);

impl FakeDevice {
    pub fn id(&self) -> u64 {
        self.0.id
    }
}

#[derive(Debug)]
struct ContextInner {
    device_id: u64,
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
pub struct FakeContext(Arc<ContextInner>);

impl FakeContext {
    pub fn device_id(&self) -> u64 {
        self.0.device_id
    }
}

#[derive(Debug)]
struct FactoryInner {
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
pub struct FakeFactory(Arc<FactoryInner>);

#[derive(Debug)]
struct TextureInner {
    id: u64,
    desc: TextureDesc,
    device: FakeDevice,
    /// Set on textures that can be exported.
    shareable: bool,
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
pub struct FakeTexture(Arc<TextureInner>);

impl FakeTexture {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn desc(&self) -> TextureDesc {
        self.0.desc
    }

    pub fn device_id(&self) -> u64 {
        self.0.device.id()
    }
}

#[derive(Debug)]
struct SwapChainInner {
    id: u64,
    device: FakeDevice,
    allow_tearing: bool,
    buffer: Mutex<FakeTexture>,
    color_space: Mutex<Option<ColorSpace>>,
    _tracked: Tracked,
}

#[derive(Debug, Clone)]
pub struct FakeSwapChain(Arc<SwapChainInner>);

impl FakeSwapChain {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn desc(&self) -> TextureDesc {
        self.0.buffer.lock().desc()
    }

    pub fn allow_tearing(&self) -> bool {
        self.0.allow_tearing
    }

    pub fn device_id(&self) -> u64 {
        self.0.device.id()
    }

    pub fn color_space(&self) -> Option<ColorSpace> {
        *self.0.color_space.lock()
    }
}

#[derive(Debug)]
pub struct FakeQuery {
    device_id: u64,
    /// Polls left before the query reports completion.
    remaining: Mutex<u32>,
    _tracked: Tracked,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    failures: HashSet<Failure>,
    tearing_supported: bool,
    query_latency: u32,
    unsupported_color_spaces: HashSet<ColorSpace>,
    rejected_color_spaces: HashSet<ColorSpace>,
    /// Exported handle -> description of the texture behind it.
    shared: HashMap<usize, TextureDesc>,
    copies: HashMap<u64, usize>,
    presents: usize,
    query_creations: usize,
    shared_creations: usize,
    opens: usize,
}

/// In-memory backend with a call journal and failure injection.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    journal: Journal,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let state = FakeState {
            next_id: 1,
            tearing_supported: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail(&self, failure: Failure) {
        self.state.lock().failures.insert(failure);
    }

    pub fn heal(&self, failure: Failure) {
        self.state.lock().failures.remove(&failure);
    }

    pub fn set_tearing_supported(&self, supported: bool) {
        self.state.lock().tearing_supported = supported;
    }

    /// Number of unsuccessful polls before each ended query signals.
    pub fn set_query_latency(&self, polls: u32) {
        self.state.lock().query_latency = polls;
    }

    /// `supports_color_space` reports false for `color_space`.
    pub fn mark_unsupported(&self, color_space: ColorSpace) {
        self.state.lock().unsupported_color_spaces.insert(color_space);
    }

    /// `supports_color_space` reports true but setting it fails.
    pub fn reject_color_space(&self, color_space: ColorSpace) {
        self.state.lock().rejected_color_spaces.insert(color_space);
    }

    /// Snapshot of the journal.
    pub fn events(&self) -> Vec<Event> {
        self.journal.lock().clone()
    }

    pub fn clear_events(&self) {
        self.journal.lock().clear();
    }

    /// Accepted copies issued on `device`'s context.
    pub fn copies_on(&self, device_id: u64) -> usize {
        self.state.lock().copies.get(&device_id).copied().unwrap_or(0)
    }

    pub fn presents(&self) -> usize {
        self.state.lock().presents
    }

    pub fn query_creations(&self) -> usize {
        self.state.lock().query_creations
    }

    pub fn shared_creations(&self) -> usize {
        self.state.lock().shared_creations
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Build a swapchain the way a host renderer would have, bypassing the
    /// factory and failure injection. Used to stand in for the source side.
    pub fn create_source_swap_chain(
        &self,
        device: &FakeDevice,
        desc: TextureDesc,
    ) -> FakeSwapChain {
        self.new_swap_chain(device, desc, false)
    }

    fn failing(&self, failure: Failure) -> bool {
        self.state.lock().failures.contains(&failure)
    }

    fn record(&self, event: Event) {
        self.journal.lock().push(event);
    }

    fn track(&self, make: impl FnOnce(u64) -> Object) -> (u64, Tracked) {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            id
        };
        let object = make(id);
        self.record(Event::Created(object));
        (
            id,
            Tracked {
                object,
                journal: self.journal.clone(),
            },
        )
    }

    fn new_texture(&self, device: &FakeDevice, desc: TextureDesc, shareable: bool) -> FakeTexture {
        let (id, tracked) = self.track(Object::Texture);
        FakeTexture(Arc::new(TextureInner {
            id,
            desc,
            device: device.clone(),
            shareable,
            _tracked: tracked,
        }))
    }

    fn new_context(&self, device_id: u64) -> FakeContext {
        let (_, tracked) = self.track(|_| Object::Context(device_id));
        FakeContext(Arc::new(ContextInner {
            device_id,
            _tracked: tracked,
        }))
    }

    fn new_swap_chain(
        &self,
        device: &FakeDevice,
        desc: TextureDesc,
        allow_tearing: bool,
    ) -> FakeSwapChain {
        let buffer = self.new_texture(device, desc, false);
        let (id, tracked) = self.track(Object::SwapChain);
        FakeSwapChain(Arc::new(SwapChainInner {
            id,
            device: device.clone(),
            allow_tearing,
            buffer: Mutex::new(buffer),
            color_space: Mutex::new(None),
            _tracked: tracked,
        }))
    }
}

impl GpuBackend for FakeBackend {
    type Device = FakeDevice;
    type Context = FakeContext;
    type Factory = FakeFactory;
    type SwapChain = FakeSwapChain;
    type Texture = FakeTexture;
    type Query = FakeQuery;

    fn create_device(&self, _debug: bool) -> Result<(FakeDevice, FakeContext)> {
        if self.failing(Failure::DeviceCreation) {
            bail!("injected device creation failure");
        }
        let (id, tracked) = self.track(Object::Device);
        let context = self.new_context(id);
        let device = FakeDevice(Arc::new(DeviceInner {
            id,
            context: Mutex::new(Arc::downgrade(&context.0)),
            _tracked: tracked,
        }));
        Ok((device, context))
    }

    fn create_factory(&self) -> Result<FakeFactory> {
        if self.failing(Failure::FactoryCreation) {
            bail!("injected factory creation failure");
        }
        let (_, tracked) = self.track(Object::Factory);
        Ok(FakeFactory(Arc::new(FactoryInner { _tracked: tracked })))
    }

    fn supports_tearing(&self, _factory: &FakeFactory) -> bool {
        self.state.lock().tearing_supported
    }

    fn create_swap_chain(
        &self,
        _factory: &FakeFactory,
        device: &FakeDevice,
        window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<FakeSwapChain> {
        if window.0 == 0 {
            bail!("null window handle");
        }
        if !(2..=16).contains(&desc.buffer_count) {
            bail!("flip-model swapchains need 2..=16 buffers");
        }
        if self.failing(Failure::SwapChainCreation) {
            bail!("injected swapchain creation failure");
        }
        let buffer_desc = TextureDesc::new(desc.width, desc.height, desc.format);
        Ok(self.new_swap_chain(device, buffer_desc, desc.allow_tearing))
    }

    fn resize_swap_chain(&self, swap_chain: &FakeSwapChain, desc: &TextureDesc) -> Result<()> {
        if self.failing(Failure::Resize) {
            bail!("injected resize failure");
        }
        if !desc.format.is_presentable() {
            bail!("{:?} is not a flip-model buffer format", desc.format);
        }
        let buffer = self.new_texture(&swap_chain.0.device, *desc, false);
        let old = std::mem::replace(&mut *swap_chain.0.buffer.lock(), buffer);
        drop(old);
        self.record(Event::Resize {
            swap_chain: swap_chain.id(),
            desc: *desc,
        });
        Ok(())
    }

    fn same_device(&self, a: &FakeDevice, b: &FakeDevice) -> bool {
        a.id() == b.id()
    }

    fn immediate_context(&self, device: &FakeDevice) -> Result<FakeContext> {
        let mut slot = device.0.context.lock();
        if let Some(inner) = slot.upgrade() {
            return Ok(FakeContext(inner));
        }
        let context = self.new_context(device.id());
        *slot = Arc::downgrade(&context.0);
        Ok(context)
    }

    fn protect_context(&self, context: &FakeContext) -> Result<()> {
        if self.failing(Failure::ContextProtection) {
            bail!("injected multithread protection failure");
        }
        self.record(Event::ContextProtected {
            device: context.device_id(),
        });
        Ok(())
    }

    fn lock_context(&self, context: &FakeContext) {
        self.record(Event::ContextLocked {
            device: context.device_id(),
        });
    }

    fn unlock_context(&self, context: &FakeContext) {
        self.record(Event::ContextUnlocked {
            device: context.device_id(),
        });
    }

    fn back_buffer(&self, swap_chain: &FakeSwapChain) -> Result<FakeTexture> {
        if self.failing(Failure::BackBuffer) {
            bail!("injected GetBuffer failure");
        }
        self.record(Event::BackBuffer {
            swap_chain: swap_chain.id(),
        });
        Ok(swap_chain.0.buffer.lock().clone())
    }

    fn texture_desc(&self, texture: &FakeTexture) -> TextureDesc {
        texture.desc()
    }

    fn texture_device(&self, texture: &FakeTexture) -> Result<FakeDevice> {
        Ok(texture.0.device.clone())
    }

    fn create_shared_texture(
        &self,
        device: &FakeDevice,
        desc: &TextureDesc,
    ) -> Result<FakeTexture> {
        if self.failing(Failure::SharedTextureCreation) {
            bail!("injected shared texture creation failure");
        }
        self.state.lock().shared_creations += 1;
        Ok(self.new_texture(device, *desc, true))
    }

    fn shared_handle(&self, texture: &FakeTexture) -> Result<SharedHandle> {
        if self.failing(Failure::SharedHandle) {
            bail!("injected GetSharedHandle failure");
        }
        if !texture.0.shareable {
            bail!("texture was not created shareable");
        }
        let handle = 0x1000 + texture.id() as usize;
        self.state.lock().shared.insert(handle, texture.desc());
        Ok(SharedHandle(handle))
    }

    fn open_shared_texture(
        &self,
        device: &FakeDevice,
        handle: SharedHandle,
    ) -> Result<FakeTexture> {
        if self.failing(Failure::OpenShared) {
            bail!("injected OpenSharedResource failure");
        }
        let desc = {
            let mut state = self.state.lock();
            state.opens += 1;
            state.shared.get(&handle.0).copied()
        };
        let desc = desc.ok_or_else(|| anyhow!("unknown shared handle {:#x}", handle.0))?;
        self.record(Event::OpenShared {
            device: device.id(),
        });
        Ok(self.new_texture(device, desc, false))
    }

    fn copy_texture(&self, context: &FakeContext, dst: &FakeTexture, src: &FakeTexture) {
        let device = context.device_id();
        let valid =
            dst.device_id() == device && src.device_id() == device && dst.desc() == src.desc();
        if valid {
            *self.state.lock().copies.entry(device).or_default() += 1;
            self.record(Event::Copy { device });
        } else {
            self.record(Event::CopyRejected { device });
        }
    }

    fn flush(&self, context: &FakeContext) {
        self.record(Event::Flush {
            device: context.device_id(),
        });
    }

    fn present(&self, swap_chain: &FakeSwapChain, params: PresentParams) -> Result<()> {
        if self.failing(Failure::Present) {
            bail!("injected present failure");
        }
        if params.allow_tearing && !swap_chain.allow_tearing() {
            bail!("tearing present on a swapchain created without tearing");
        }
        self.state.lock().presents += 1;
        self.record(Event::Present {
            swap_chain: swap_chain.id(),
            sync_interval: params.sync_interval,
            allow_tearing: params.allow_tearing,
        });
        Ok(())
    }

    fn create_event_query(&self, device: &FakeDevice) -> Result<FakeQuery> {
        self.state.lock().query_creations += 1;
        if self.failing(Failure::QueryCreation) {
            bail!("injected query creation failure");
        }
        let (_, tracked) = self.track(Object::Query);
        Ok(FakeQuery {
            device_id: device.id(),
            remaining: Mutex::new(0),
            _tracked: tracked,
        })
    }

    fn end_query(&self, context: &FakeContext, query: &FakeQuery) {
        *query.remaining.lock() = self.state.lock().query_latency;
        self.record(Event::EndQuery {
            device: context.device_id(),
        });
    }

    fn query_signaled(&self, context: &FakeContext, query: &FakeQuery) -> Result<bool> {
        if context.device_id() != query.device_id {
            bail!("query polled on a foreign context");
        }
        if self.failing(Failure::QueryError) {
            bail!("injected device removed");
        }
        if self.failing(Failure::QueryNeverSignals) {
            return Ok(false);
        }
        let mut remaining = query.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(false);
        }
        drop(remaining);
        self.record(Event::QuerySignaled {
            device: query.device_id,
        });
        Ok(true)
    }

    fn supports_color_space(&self, _swap_chain: &FakeSwapChain, color_space: ColorSpace) -> bool {
        !self.state.lock().unsupported_color_spaces.contains(&color_space)
    }

    fn set_color_space(&self, swap_chain: &FakeSwapChain, color_space: ColorSpace) -> Result<()> {
        if self.state.lock().rejected_color_spaces.contains(&color_space) {
            bail!("injected SetColorSpace1 failure for {color_space:?}");
        }
        *swap_chain.0.color_space.lock() = Some(color_space);
        self.record(Event::SetColorSpace {
            swap_chain: swap_chain.id(),
            color_space,
        });
        Ok(())
    }
}
