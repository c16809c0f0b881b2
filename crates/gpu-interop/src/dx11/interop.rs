//! D3D11 shared-handle export/import, copies, queries and presentation.
//!
//! Shared textures use legacy `D3D11_RESOURCE_MISC_SHARED` handles obtained
//! from `IDXGIResource::GetSharedHandle`. Those are created on the proxy
//! device and opened with `ID3D11Device::OpenSharedResource` on the source
//! device; the reverse direction is not reliably supported by older runtimes.

use std::ffi::c_void;

use anyhow::{Context as _, Result};
use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::device::{
    from_dxgi_format, to_dxgi_format, Dx11Context, Dx11Device, Dx11Query, Dx11SwapChain,
    Dx11Texture,
};
use crate::backend::{PresentParams, SharedHandle, TextureDesc};
use crate::format::ColorSpace;

pub fn back_buffer(swap_chain: &Dx11SwapChain) -> Result<Dx11Texture> {
    let texture: ID3D11Texture2D =
        unsafe { swap_chain.0.GetBuffer(0) }.context("IDXGISwapChain::GetBuffer failed")?;
    Ok(Dx11Texture(texture))
}

pub fn texture_desc(texture: &Dx11Texture) -> TextureDesc {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.0.GetDesc(&mut desc) };
    TextureDesc::new(desc.Width, desc.Height, from_dxgi_format(desc.Format))
}

pub fn texture_device(texture: &Dx11Texture) -> Result<Dx11Device> {
    let device = unsafe { texture.0.GetDevice() }.context("ID3D11DeviceChild::GetDevice failed")?;
    Ok(Dx11Device(device))
}

/// Create a texture with `D3D11_RESOURCE_MISC_SHARED`, usable as a copy
/// destination on the opening device and a copy source on this one.
pub fn create_shared_texture(device: &Dx11Device, desc: &TextureDesc) -> Result<Dx11Texture> {
    let d3d_desc = D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: to_dxgi_format(desc.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
    };

    let mut texture = None;
    unsafe { device.0.CreateTexture2D(&d3d_desc, None, Some(&mut texture as *mut _)) }
        .context("CreateTexture2D (shared) failed")?;
    Ok(Dx11Texture(texture.context("CreateTexture2D returned no texture")?))
}

pub fn shared_handle(texture: &Dx11Texture) -> Result<SharedHandle> {
    let resource: IDXGIResource = texture.0.cast().context("texture is not an IDXGIResource")?;
    let handle = unsafe { resource.GetSharedHandle() }.context("GetSharedHandle failed")?;
    if handle.is_invalid() {
        anyhow::bail!("GetSharedHandle returned an invalid handle");
    }
    Ok(SharedHandle(handle.0 as usize))
}

pub fn open_shared_texture(device: &Dx11Device, handle: SharedHandle) -> Result<Dx11Texture> {
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.0.OpenSharedResource(HANDLE(handle.0 as *mut c_void), &mut texture) }
        .context("OpenSharedResource failed")?;
    Ok(Dx11Texture(
        texture.context("OpenSharedResource returned no texture")?,
    ))
}

pub fn copy_texture(context: &Dx11Context, dst: &Dx11Texture, src: &Dx11Texture) {
    unsafe { context.0.CopyResource(&dst.0, &src.0) };
}

pub fn flush(context: &Dx11Context) {
    unsafe { context.0.Flush() };
}

pub fn present(swap_chain: &Dx11SwapChain, params: PresentParams) -> Result<()> {
    let flags = if params.allow_tearing {
        DXGI_PRESENT_ALLOW_TEARING
    } else {
        DXGI_PRESENT(0)
    };
    unsafe { swap_chain.0.Present(params.sync_interval, flags) }
        .ok()
        .context("IDXGISwapChain::Present failed")
}

pub fn end_query(context: &Dx11Context, query: &Dx11Query) {
    unsafe { context.0.End(&query.0) };
}

/// Non-blocking `GetData` on an event query.
///
/// For `D3D11_QUERY_EVENT`, GetData writes a BOOL: TRUE when the GPU is done.
/// It returns S_OK when data is ready and S_FALSE when not yet ready, and the
/// windows crate maps both to `Ok(())` since S_FALSE is a success HRESULT, so
/// the BOOL is what we check. On S_FALSE the output is left unmodified and our
/// zero-init stays 0. A failure HRESULT means the device was removed.
pub fn query_signaled(context: &Dx11Context, query: &Dx11Query) -> Result<bool> {
    let mut done: u32 = 0;
    unsafe {
        context.0.GetData(
            &query.0,
            Some(&mut done as *mut u32 as *mut c_void),
            std::mem::size_of::<u32>() as u32,
            D3D11_ASYNC_GETDATA_DONOTFLUSH.0 as u32,
        )
    }
    .context("ID3D11DeviceContext::GetData failed")?;
    Ok(done != 0)
}

fn to_dxgi_color_space(color_space: ColorSpace) -> DXGI_COLOR_SPACE_TYPE {
    match color_space {
        ColorSpace::Srgb => DXGI_COLOR_SPACE_RGB_FULL_G22_NONE_P709,
        ColorSpace::ScRgbLinear => DXGI_COLOR_SPACE_RGB_FULL_G10_NONE_P709,
        ColorSpace::Hdr10 => DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020,
    }
}

pub fn supports_color_space(swap_chain: &Dx11SwapChain, color_space: ColorSpace) -> bool {
    let Ok(swap_chain3) = swap_chain.0.cast::<IDXGISwapChain3>() else {
        return false;
    };
    match unsafe { swap_chain3.CheckColorSpaceSupport(to_dxgi_color_space(color_space)) } {
        Ok(support) => support & DXGI_SWAP_CHAIN_COLOR_SPACE_SUPPORT_FLAG_PRESENT.0 as u32 != 0,
        Err(_) => false,
    }
}

pub fn set_color_space(swap_chain: &Dx11SwapChain, color_space: ColorSpace) -> Result<()> {
    let swap_chain3: IDXGISwapChain3 = swap_chain
        .0
        .cast()
        .context("swapchain is not IDXGISwapChain3")?;
    unsafe { swap_chain3.SetColorSpace1(to_dxgi_color_space(color_space)) }
        .with_context(|| format!("SetColorSpace1({color_space:?}) failed"))
}
