//! D3D11 device, factory and flip-model swapchain creation.
//!
//! Holds only what the frame bridge needs: the device, its immediate context,
//! and a DXGI factory for swapchain creation. No shaders, no pipelines.

use std::ffi::c_void;

use anyhow::{anyhow, Context as _, Result};
use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::{HMODULE, HWND};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use tracing::debug;

use crate::backend::{SwapChainDesc, TextureDesc, WindowHandle};
use crate::format::PixelFormat;

// ---------------------------------------------------------------------------
// Handle wrappers
// ---------------------------------------------------------------------------

/// `ID3D11Device` handle.
#[derive(Clone, PartialEq, Eq)]
pub struct Dx11Device(pub ID3D11Device);

/// Immediate `ID3D11DeviceContext` handle.
#[derive(Clone, PartialEq, Eq)]
pub struct Dx11Context(pub ID3D11DeviceContext);

/// `IDXGIFactory2` handle.
#[derive(Clone, PartialEq, Eq)]
pub struct Dx11Factory(pub IDXGIFactory2);

/// Any DXGI swapchain: the proxy's own, or the host's source swapchain.
#[derive(Clone, PartialEq, Eq)]
pub struct Dx11SwapChain(pub IDXGISwapChain);

/// `ID3D11Texture2D` handle.
#[derive(Clone, PartialEq, Eq)]
pub struct Dx11Texture(pub ID3D11Texture2D);

/// `D3D11_QUERY_EVENT` query.
pub struct Dx11Query(pub ID3D11Query);

// SAFETY: D3D11 devices are free-threaded unless created SINGLETHREADED,
// which this backend never does, and DXGI objects are free-threaded. Immediate
// contexts and queries are not thread-safe. The proxy context is only used
// under the manager's engine lock. The source context is shared with the
// host's render thread, so the copy thread turns on multithread protection
// for it (`protect_context`) and holds its critical section (`lock_context`)
// for every command it records there.
unsafe impl Send for Dx11Device {}
unsafe impl Sync for Dx11Device {}
unsafe impl Send for Dx11Context {}
unsafe impl Sync for Dx11Context {}
unsafe impl Send for Dx11Factory {}
unsafe impl Sync for Dx11Factory {}
unsafe impl Send for Dx11SwapChain {}
unsafe impl Sync for Dx11SwapChain {}
unsafe impl Send for Dx11Texture {}
unsafe impl Sync for Dx11Texture {}
unsafe impl Send for Dx11Query {}
unsafe impl Sync for Dx11Query {}

// ---------------------------------------------------------------------------
// Format mapping
// ---------------------------------------------------------------------------

pub fn to_dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Other(raw) => DXGI_FORMAT(raw as i32),
    }
}

pub fn from_dxgi_format(format: DXGI_FORMAT) -> PixelFormat {
    match format {
        DXGI_FORMAT_R10G10B10A2_UNORM => PixelFormat::Rgb10A2Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => PixelFormat::Rgba16Float,
        DXGI_FORMAT_R8G8B8A8_UNORM => PixelFormat::Rgba8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM => PixelFormat::Bgra8Unorm,
        other => PixelFormat::Other(other.0 as u32),
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Create a D3D11 device using hardware acceleration, falling back to WARP if
/// hardware is unavailable (e.g. CI/headless environments).
///
/// The device is multithreaded: the copy thread and the render thread may both
/// hold it, even if they never use the context at the same time.
pub fn create_device(debug: bool) -> Result<(Dx11Device, Dx11Context)> {
    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if debug {
        flags |= D3D11_CREATE_DEVICE_DEBUG;
    }
    let feature_levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];

    // Try HARDWARE first, fall back to WARP for CI/headless
    let driver_types = [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP];
    let mut last_error = None;

    for &driver_type in &driver_types {
        let mut device = None;
        let mut context = None;
        let hr = unsafe {
            D3D11CreateDevice(
                None,
                driver_type,
                HMODULE::default(),
                flags,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device as *mut _),
                None,
                Some(&mut context as *mut _),
            )
        };
        match hr {
            Ok(()) => {
                debug!("D3D11 device created with driver type {:?}", driver_type);
                let device = device.context("D3D11CreateDevice did not return a device")?;
                let context = context.context("D3D11CreateDevice did not return a device context")?;
                return Ok((Dx11Device(device), Dx11Context(context)));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "Failed to create D3D11 device with any driver type: {:?}",
        last_error
    ))
}

pub fn create_factory() -> Result<Dx11Factory> {
    let factory: IDXGIFactory2 = unsafe { CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)) }
        .context("CreateDXGIFactory2 failed")?;
    Ok(Dx11Factory(factory))
}

/// Ask DXGI 1.5 whether tearing presents are allowed on this system.
pub fn supports_tearing(factory: &Dx11Factory) -> bool {
    let Ok(factory5) = factory.0.cast::<IDXGIFactory5>() else {
        return false;
    };
    let mut allow = BOOL(0);
    let hr = unsafe {
        factory5.CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            &mut allow as *mut BOOL as *mut c_void,
            std::mem::size_of::<BOOL>() as u32,
        )
    };
    hr.is_ok() && allow.as_bool()
}

/// Create a flip-discard swapchain for `window`.
pub fn create_swap_chain(
    factory: &Dx11Factory,
    device: &Dx11Device,
    window: WindowHandle,
    desc: &SwapChainDesc,
) -> Result<Dx11SwapChain> {
    if window.0 == 0 {
        return Err(anyhow!("null window handle"));
    }

    let flags = if desc.allow_tearing {
        DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
    } else {
        0
    };

    let swap_desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: desc.width,
        Height: desc.height,
        Format: to_dxgi_format(desc.format),
        Stereo: false.into(),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: desc.buffer_count,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        AlphaMode: DXGI_ALPHA_MODE_IGNORE,
        Flags: flags,
    };

    let hwnd = HWND(window.0 as *mut c_void);
    let swap_chain1 = unsafe {
        factory
            .0
            .CreateSwapChainForHwnd(&device.0, hwnd, &swap_desc, None, None)
    }
    .with_context(|| {
        format!(
            "CreateSwapChainForHwnd failed ({}x{}, {:?}, {} buffers)",
            desc.width, desc.height, desc.format, desc.buffer_count
        )
    })?;

    Ok(Dx11SwapChain(swap_chain1.cast()?))
}

/// Recreate every buffer of `swap_chain` at `desc`'s size and format,
/// keeping buffer count and flags.
pub fn resize_swap_chain(swap_chain: &Dx11SwapChain, desc: &TextureDesc) -> Result<()> {
    let current = unsafe { swap_chain.0.GetDesc() }.context("IDXGISwapChain::GetDesc failed")?;
    unsafe {
        swap_chain.0.ResizeBuffers(
            0,
            desc.width,
            desc.height,
            to_dxgi_format(desc.format),
            DXGI_SWAP_CHAIN_FLAG(current.Flags as i32),
        )
    }
    .with_context(|| {
        format!(
            "ResizeBuffers to {}x{} {:?} failed",
            desc.width, desc.height, desc.format
        )
    })
}

/// Identity comparison through `IUnknown`, which COM guarantees is stable.
pub fn same_device(a: &Dx11Device, b: &Dx11Device) -> bool {
    match (a.0.cast::<windows::core::IUnknown>(), b.0.cast::<windows::core::IUnknown>()) {
        (Ok(a), Ok(b)) => a.as_raw() == b.as_raw(),
        _ => false,
    }
}

pub fn immediate_context(device: &Dx11Device) -> Result<Dx11Context> {
    let context = unsafe { device.0.GetImmediateContext() }.context("GetImmediateContext failed")?;
    Ok(Dx11Context(context))
}

/// Make the runtime serialize calls on `context` through its own critical
/// section, so [`lock_context`] can bracket work against another thread.
pub fn protect_context(context: &Dx11Context) -> Result<()> {
    let multithread: ID3D11Multithread = context
        .0
        .cast()
        .context("device context is not ID3D11Multithread")?;
    let was_protected = unsafe { multithread.SetMultithreadProtected(true) };
    debug!(
        "D3D11 multithread protection enabled (was {})",
        was_protected.as_bool()
    );
    Ok(())
}

pub fn lock_context(context: &Dx11Context) {
    if let Ok(multithread) = context.0.cast::<ID3D11Multithread>() {
        unsafe { multithread.Enter() };
    }
}

pub fn unlock_context(context: &Dx11Context) {
    if let Ok(multithread) = context.0.cast::<ID3D11Multithread>() {
        unsafe { multithread.Leave() };
    }
}

/// Create a `D3D11_QUERY_EVENT` for GPU synchronization.
pub fn create_event_query(device: &Dx11Device) -> Result<Dx11Query> {
    let desc = D3D11_QUERY_DESC {
        Query: D3D11_QUERY_EVENT,
        ..Default::default()
    };
    let mut query = None;
    unsafe { device.0.CreateQuery(&desc, Some(&mut query as *mut _)) }
        .context("CreateQuery failed")?;
    Ok(Dx11Query(query.context("CreateQuery returned no query")?))
}
