//! Direct3D 11 / DXGI backend (Windows).

pub mod device;
pub mod interop;

use anyhow::Result;

pub use device::{Dx11Context, Dx11Device, Dx11Factory, Dx11Query, Dx11SwapChain, Dx11Texture};

use crate::backend::{
    GpuBackend, PresentParams, SharedHandle, SwapChainDesc, TextureDesc, WindowHandle,
};
use crate::format::ColorSpace;

/// [`GpuBackend`] over D3D11 devices and DXGI swapchains.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dx11Backend;

impl GpuBackend for Dx11Backend {
    type Device = Dx11Device;
    type Context = Dx11Context;
    type Factory = Dx11Factory;
    type SwapChain = Dx11SwapChain;
    type Texture = Dx11Texture;
    type Query = Dx11Query;

    fn create_device(&self, debug: bool) -> Result<(Dx11Device, Dx11Context)> {
        device::create_device(debug)
    }

    fn create_factory(&self) -> Result<Dx11Factory> {
        device::create_factory()
    }

    fn supports_tearing(&self, factory: &Dx11Factory) -> bool {
        device::supports_tearing(factory)
    }

    fn create_swap_chain(
        &self,
        factory: &Dx11Factory,
        device: &Dx11Device,
        window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<Dx11SwapChain> {
        device::create_swap_chain(factory, device, window, desc)
    }

    fn resize_swap_chain(&self, swap_chain: &Dx11SwapChain, desc: &TextureDesc) -> Result<()> {
        device::resize_swap_chain(swap_chain, desc)
    }

    fn same_device(&self, a: &Dx11Device, b: &Dx11Device) -> bool {
        device::same_device(a, b)
    }

    fn immediate_context(&self, device: &Dx11Device) -> Result<Dx11Context> {
        device::immediate_context(device)
    }

    fn protect_context(&self, context: &Dx11Context) -> Result<()> {
        device::protect_context(context)
    }

    fn lock_context(&self, context: &Dx11Context) {
        device::lock_context(context)
    }

    fn unlock_context(&self, context: &Dx11Context) {
        device::unlock_context(context)
    }

    fn back_buffer(&self, swap_chain: &Dx11SwapChain) -> Result<Dx11Texture> {
        interop::back_buffer(swap_chain)
    }

    fn texture_desc(&self, texture: &Dx11Texture) -> TextureDesc {
        interop::texture_desc(texture)
    }

    fn texture_device(&self, texture: &Dx11Texture) -> Result<Dx11Device> {
        interop::texture_device(texture)
    }

    fn create_shared_texture(
        &self,
        device: &Dx11Device,
        desc: &TextureDesc,
    ) -> Result<Dx11Texture> {
        interop::create_shared_texture(device, desc)
    }

    fn shared_handle(&self, texture: &Dx11Texture) -> Result<SharedHandle> {
        interop::shared_handle(texture)
    }

    fn open_shared_texture(
        &self,
        device: &Dx11Device,
        handle: SharedHandle,
    ) -> Result<Dx11Texture> {
        interop::open_shared_texture(device, handle)
    }

    fn copy_texture(&self, context: &Dx11Context, dst: &Dx11Texture, src: &Dx11Texture) {
        interop::copy_texture(context, dst, src)
    }

    fn flush(&self, context: &Dx11Context) {
        interop::flush(context)
    }

    fn present(&self, swap_chain: &Dx11SwapChain, params: PresentParams) -> Result<()> {
        interop::present(swap_chain, params)
    }

    fn create_event_query(&self, device: &Dx11Device) -> Result<Dx11Query> {
        device::create_event_query(device)
    }

    fn end_query(&self, context: &Dx11Context, query: &Dx11Query) {
        interop::end_query(context, query)
    }

    fn query_signaled(&self, context: &Dx11Context, query: &Dx11Query) -> Result<bool> {
        interop::query_signaled(context, query)
    }

    fn supports_color_space(&self, swap_chain: &Dx11SwapChain, color_space: ColorSpace) -> bool {
        interop::supports_color_space(swap_chain, color_space)
    }

    fn set_color_space(&self, swap_chain: &Dx11SwapChain, color_space: ColorSpace) -> Result<()> {
        interop::set_color_space(swap_chain, color_space)
    }
}
