//! Settings read by the proxy at call time.
//!
//! The host's configuration layer owns and persists these. The proxy only
//! ever takes snapshots through [`SettingsSource`], so a host can hand over a
//! fixed [`ProxySettings`] or a shared `RwLock` it keeps mutating.

use std::sync::Arc;

use parking_lot::RwLock;

use gpu_interop::format::{self, ColorSpace, PixelFormat};

/// Smallest and largest swapchain buffer counts we create.
pub const MIN_BUFFER_COUNT: u32 = 2;
pub const MAX_BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Master switch for the per-frame copy.
    pub enabled: bool,
    /// Whether the host should initialize the proxy on its own. Informational
    /// only; the proxy never initializes itself.
    pub auto_initialize: bool,
    /// Whether the host wants a proxy-owned swapchain.
    pub create_swapchain: bool,
    /// See [`gpu_interop::format::output_format`].
    pub output_format_selector: i32,
    pub allow_tearing: bool,
    pub buffer_count: u32,
    /// Create the proxy device with the debug layer.
    pub debug_mode: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_initialize: true,
            create_swapchain: true,
            output_format_selector: format::SELECTOR_10BIT,
            allow_tearing: true,
            buffer_count: 3,
            debug_mode: false,
        }
    }
}

impl ProxySettings {
    /// Copy with `buffer_count` clamped to what a flip-model swapchain takes.
    pub fn normalized(&self) -> Self {
        Self {
            buffer_count: self.buffer_count.clamp(MIN_BUFFER_COUNT, MAX_BUFFER_COUNT),
            ..self.clone()
        }
    }

    pub fn output_format(&self) -> PixelFormat {
        format::output_format(self.output_format_selector)
    }

    pub fn output_color_space(&self) -> ColorSpace {
        format::output_color_space(self.output_format_selector)
    }

    /// Defaults overridden by `FRAME_PROXY_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, ignoring values that don't parse.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("FRAME_PROXY_ENABLED").and_then(|v| parse_bool(&v)) {
            self.enabled = v;
        }
        if let Some(v) = lookup("FRAME_PROXY_CREATE_SWAPCHAIN").and_then(|v| parse_bool(&v)) {
            self.create_swapchain = v;
        }
        if let Some(v) = lookup("FRAME_PROXY_OUTPUT_FORMAT").and_then(|v| v.trim().parse().ok()) {
            self.output_format_selector = v;
        }
        if let Some(v) = lookup("FRAME_PROXY_ALLOW_TEARING").and_then(|v| parse_bool(&v)) {
            self.allow_tearing = v;
        }
        if let Some(v) = lookup("FRAME_PROXY_BUFFER_COUNT").and_then(|v| v.trim().parse().ok()) {
            self.buffer_count = v;
        }
        if let Some(v) = lookup("FRAME_PROXY_DEBUG").and_then(|v| parse_bool(&v)) {
            self.debug_mode = v;
        }
        self.normalized()
    }
}

/// `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`, case-insensitive.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Where the proxy reads its settings from.
pub trait SettingsSource: Send + Sync + 'static {
    fn snapshot(&self) -> ProxySettings;
}

impl SettingsSource for ProxySettings {
    fn snapshot(&self) -> ProxySettings {
        self.normalized()
    }
}

impl SettingsSource for RwLock<ProxySettings> {
    fn snapshot(&self) -> ProxySettings {
        self.read().normalized()
    }
}

impl<T: SettingsSource + ?Sized> SettingsSource for Arc<T> {
    fn snapshot(&self) -> ProxySettings {
        (**self).snapshot()
    }
}
