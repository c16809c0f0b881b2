//! Cross-device texture bridging.
//!
//! This crate defines the [`GpuBackend`] trait, the seam between the frame
//! bridge and a concrete graphics API, plus the API-neutral pieces built on
//! it: output [`format`] policy, the proxy-owned [`shared`] texture and the
//! [`fence`] used to order work across two devices. On Windows the
//! [`dx11`] backend drives D3D11/DXGI. The `fake` feature adds an instrumented
//! in-memory backend for tests.

pub mod backend;
pub mod fence;
pub mod format;
pub mod shared;

pub use backend::{
    GpuBackend, PresentParams, SharedHandle, SwapChainDesc, TextureDesc, WindowHandle,
};
pub use fence::{CompletionFence, FenceState, PollBudget, WaitOutcome};
pub use format::{ColorSpace, PixelFormat};
pub use shared::{OpenedSharedTexture, OwnedSharedTexture, SharedResourceBridge};

// Platform-specific implementations.

#[cfg(target_os = "windows")]
pub mod dx11;

#[cfg(any(test, feature = "fake"))]
pub mod fake;
