//! Re-present frames from a legacy swapchain through a modern one.
//!
//! A host that has intercepted an older renderer's swapchain hands it to a
//! [`ProxyDeviceManager`] once per frame. The manager owns a second
//! ("proxy") device with a flip-model swapchain and copies each source
//! backbuffer across:
//!
//! ```text
//! source device                         proxy device
//! backbuffer --copy--> shared texture (opened)
//!            end query, flush, poll
//!                      shared texture (owned) --copy--> backbuffer --present-->
//! ```
//!
//! The graphics API sits behind [`gpu_interop::GpuBackend`]; on Windows use
//! `gpu_interop::dx11::Dx11Backend`.

pub mod color_space;
pub mod copy_engine;
mod copy_thread;
pub mod error;
pub mod logging;
pub mod manager;
pub mod settings;
pub mod stats;
pub mod throttle;

pub use copy_engine::{CopyPath, FenceWait, FrameCopyEngine, FrameReport, ProxyTarget};
pub use error::{ErrorClass, ProxyError, ProxyResult};
pub use manager::ProxyDeviceManager;
pub use settings::{ProxySettings, SettingsSource};
pub use stats::ProxyStats;
pub use throttle::LogThrottle;

pub use gpu_interop::{ColorSpace, PixelFormat, PollBudget, WindowHandle};
