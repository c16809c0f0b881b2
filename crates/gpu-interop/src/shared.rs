//! Cross-device shared texture.
//!
//! Exporting a shareable texture is only reliable in one direction, so the
//! texture is always *created* on the proxy device and only ever *opened* on
//! the source device. The two sides are different types:
//! [`OwnedSharedTexture`] is the only thing that can produce a
//! [`SharedHandle`], and an [`OpenedSharedTexture`] can only be made from an
//! owned one.

use anyhow::{Context as _, Result};
use tracing::{debug, error};

use crate::backend::{GpuBackend, SharedHandle, TextureDesc};
use crate::format::PixelFormat;

/// Shareable texture created on (and owned by) the proxy device.
pub struct OwnedSharedTexture<B: GpuBackend> {
    texture: B::Texture,
    handle: SharedHandle,
    desc: TextureDesc,
}

impl<B: GpuBackend> OwnedSharedTexture<B> {
    /// Create a shareable texture on `device` and export its handle.
    ///
    /// Nothing survives a failure: the texture is dropped if the export fails.
    pub fn create(backend: &B, device: &B::Device, desc: &TextureDesc) -> Result<Self> {
        let texture = backend
            .create_shared_texture(device, desc)
            .with_context(|| {
                format!(
                    "failed to create {}x{} shared texture",
                    desc.width, desc.height
                )
            })?;
        let handle = backend
            .shared_handle(&texture)
            .context("failed to export shared handle")?;
        Ok(Self {
            texture,
            handle,
            desc: *desc,
        })
    }

    /// Import this texture on another device.
    pub fn open_on(&self, backend: &B, device: &B::Device) -> Result<OpenedSharedTexture<B>> {
        let texture = backend
            .open_shared_texture(device, self.handle)
            .with_context(|| format!("failed to open shared handle {:#x}", self.handle.0))?;
        Ok(OpenedSharedTexture {
            texture,
            device: device.clone(),
        })
    }

    pub fn texture(&self) -> &B::Texture {
        &self.texture
    }

    pub fn handle(&self) -> SharedHandle {
        self.handle
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }
}

/// The shared texture as seen from the opening (source) device.
pub struct OpenedSharedTexture<B: GpuBackend> {
    texture: B::Texture,
    device: B::Device,
}

impl<B: GpuBackend> OpenedSharedTexture<B> {
    pub fn texture(&self) -> &B::Texture {
        &self.texture
    }

    /// Device the handle was opened on.
    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// One shared texture between a source swapchain and the proxy device.
///
/// Created lazily from the first source backbuffer seen; the opening side is
/// cached until the source device changes or [`Self::cleanup`] runs.
pub struct SharedResourceBridge<B: GpuBackend> {
    owned: Option<OwnedSharedTexture<B>>,
    opened: Option<OpenedSharedTexture<B>>,
}

impl<B: GpuBackend> Default for SharedResourceBridge<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> SharedResourceBridge<B> {
    pub fn new() -> Self {
        Self {
            owned: None,
            opened: None,
        }
    }

    /// Create the shared texture on `proxy_device`, sized and typed after the
    /// source swapchain's backbuffer.
    ///
    /// Replaces any previous texture. On failure the bridge is left empty.
    pub fn initialize(
        &mut self,
        backend: &B,
        proxy_device: &B::Device,
        source: &B::SwapChain,
    ) -> Result<()> {
        self.cleanup();

        let desc = {
            let back_buffer = backend
                .back_buffer(source)
                .context("failed to get source backbuffer")?;
            backend.texture_desc(&back_buffer)
        };
        self.initialize_with_desc(backend, proxy_device, &desc)
    }

    /// Like [`Self::initialize`] when the backbuffer description is already
    /// known.
    pub fn initialize_with_desc(
        &mut self,
        backend: &B,
        proxy_device: &B::Device,
        desc: &TextureDesc,
    ) -> Result<()> {
        self.cleanup();

        if desc.width == 0 || desc.height == 0 {
            anyhow::bail!("source backbuffer has zero size ({}x{})", desc.width, desc.height);
        }

        match OwnedSharedTexture::create(backend, proxy_device, desc) {
            Ok(owned) => {
                debug!(
                    "Shared texture {}x{} {:?} created, handle {:#x}",
                    desc.width,
                    desc.height,
                    desc.format,
                    owned.handle().0
                );
                self.owned = Some(owned);
                Ok(())
            }
            Err(e) => {
                error!("Shared resource initialization failed: {e:#}");
                Err(e)
            }
        }
    }

    /// Whether the shared texture fits a source backbuffer described by `desc`.
    pub fn matches(&self, desc: &TextureDesc) -> bool {
        self.owned.as_ref().is_some_and(|o| o.desc() == *desc)
    }

    /// Opened view of the shared texture on `device`, opening it on first use
    /// or when the device changed since the last call.
    pub fn open_on(&mut self, backend: &B, device: &B::Device) -> Result<&OpenedSharedTexture<B>> {
        let owned = self
            .owned
            .as_ref()
            .context("shared texture not initialized")?;

        let reusable = self
            .opened
            .as_ref()
            .is_some_and(|o| backend.same_device(o.device(), device));
        if !reusable {
            self.opened = None;
            self.opened = Some(owned.open_on(backend, device)?);
        }

        self.opened.as_ref().context("shared texture not opened")
    }

    pub fn owned(&self) -> Option<&OwnedSharedTexture<B>> {
        self.owned.as_ref()
    }

    /// Release both sides. The handle itself belongs to the driver.
    pub fn cleanup(&mut self) {
        // Opening side first: it refers to the owner's memory.
        self.opened = None;
        self.owned = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.owned.is_some()
    }

    pub fn handle(&self) -> Option<SharedHandle> {
        self.owned.as_ref().map(|o| o.handle())
    }

    pub fn width(&self) -> u32 {
        self.owned.as_ref().map_or(0, |o| o.desc().width)
    }

    pub fn height(&self) -> u32 {
        self.owned.as_ref().map_or(0, |o| o.desc().height)
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.owned.as_ref().map(|o| o.desc().format)
    }
}
