//! Best-effort color-space setup on a swapchain.

use tracing::{debug, warn};

use gpu_interop::format::STANDARD_COLOR_SPACE;
use gpu_interop::{ColorSpace, GpuBackend};

use crate::error::{ProxyError, ProxyResult};

/// Set `target` on `swap_chain`, falling back once to the standard color
/// space. Returns the color space actually applied.
///
/// Nothing is ever set without the swapchain first reporting support for it.
pub fn apply<B: GpuBackend>(
    backend: &B,
    swap_chain: &B::SwapChain,
    target: ColorSpace,
) -> ProxyResult<ColorSpace> {
    let first_failure = match try_set(backend, swap_chain, target) {
        Ok(()) => {
            debug!("Color space set to {target:?}");
            return Ok(target);
        }
        Err(reason) => reason,
    };

    if target == STANDARD_COLOR_SPACE {
        return Err(ProxyError::ColorSpace(first_failure));
    }

    warn!("Color space {target:?} not applied ({first_failure}), using {STANDARD_COLOR_SPACE:?}");
    match try_set(backend, swap_chain, STANDARD_COLOR_SPACE) {
        Ok(()) => Ok(STANDARD_COLOR_SPACE),
        Err(fallback_failure) => Err(ProxyError::ColorSpace(format!(
            "{target:?}: {first_failure}; {STANDARD_COLOR_SPACE:?}: {fallback_failure}"
        ))),
    }
}

fn try_set<B: GpuBackend>(
    backend: &B,
    swap_chain: &B::SwapChain,
    color_space: ColorSpace,
) -> Result<(), String> {
    if !backend.supports_color_space(swap_chain, color_space) {
        return Err("not supported".to_string());
    }
    backend
        .set_color_space(swap_chain, color_space)
        .map_err(|e| format!("{e:#}"))
}
