//! Output pixel format and color space policy.
//!
//! The host hands us a small integer selector (persisted by its own
//! configuration layer). Everything that needs a concrete format or color
//! space for the proxy swapchain goes through [`output_format`] and
//! [`output_color_space`] so both sides always agree.

/// Pixel formats the bridge understands by name.
///
/// Source backbuffers can be in any format the source API produced; those we
/// don't care to name are carried through as [`PixelFormat::Other`] with the
/// backend's raw format value so copies between identical formats still work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 10 bits per color channel, 2-bit alpha, unsigned normalized.
    Rgb10A2Unorm,
    /// 16-bit float per channel (scRGB capable).
    Rgba16Float,
    /// 8 bits per channel, RGBA order, unsigned normalized.
    Rgba8Unorm,
    /// 8 bits per channel, BGRA order, unsigned normalized.
    Bgra8Unorm,
    /// Any other backend-specific format value.
    Other(u32),
}

impl PixelFormat {
    /// Bits per color channel, or `None` for formats we don't classify.
    pub fn bits_per_channel(self) -> Option<u32> {
        match self {
            Self::Rgb10A2Unorm => Some(10),
            Self::Rgba16Float => Some(16),
            Self::Rgba8Unorm | Self::Bgra8Unorm => Some(8),
            Self::Other(_) => None,
        }
    }

    /// Whether a flip-model swapchain can use this format for its buffers.
    pub fn is_presentable(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Output color spaces a flip-model swapchain can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Full-range RGB, gamma 2.2, BT.709 primaries. The standard fallback.
    Srgb,
    /// Full-range RGB, linear gamma, BT.709 primaries (scRGB).
    ScRgbLinear,
    /// Full-range RGB, SMPTE ST.2084 (PQ), BT.2020 primaries (HDR10).
    Hdr10,
}

impl ColorSpace {
    /// Whether this is a wide-gamut / high dynamic range space.
    pub fn is_hdr(self) -> bool {
        !matches!(self, Self::Srgb)
    }
}

/// Selector value for a 10-bit output (also the default).
pub const SELECTOR_10BIT: i32 = 0;
/// Selector value for a 16-bit float output.
pub const SELECTOR_16BIT_FLOAT: i32 = 1;
/// Selector value for an 8-bit output.
pub const SELECTOR_8BIT: i32 = 2;

/// All selector values with a defined mapping.
pub const DEFINED_SELECTORS: [i32; 3] = [SELECTOR_10BIT, SELECTOR_16BIT_FLOAT, SELECTOR_8BIT];

/// Color space used when the preferred one is rejected.
pub const STANDARD_COLOR_SPACE: ColorSpace = ColorSpace::Srgb;

/// Map an output-format selector to the proxy swapchain's pixel format.
///
/// Unknown selectors resolve to the 10-bit format.
pub fn output_format(selector: i32) -> PixelFormat {
    match selector {
        SELECTOR_16BIT_FLOAT => PixelFormat::Rgba16Float,
        SELECTOR_8BIT => PixelFormat::Rgba8Unorm,
        _ => PixelFormat::Rgb10A2Unorm,
    }
}

/// Map an output-format selector to the color space matching its format.
pub fn output_color_space(selector: i32) -> ColorSpace {
    color_space_for_format(output_format(selector))
}

/// Color space a swapchain in `format` should advertise.
pub fn color_space_for_format(format: PixelFormat) -> ColorSpace {
    match format {
        PixelFormat::Rgb10A2Unorm => ColorSpace::Hdr10,
        PixelFormat::Rgba16Float => ColorSpace::ScRgbLinear,
        _ => ColorSpace::Srgb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_selectors_map_to_distinct_formats() {
        assert_eq!(output_format(SELECTOR_10BIT), PixelFormat::Rgb10A2Unorm);
        assert_eq!(output_format(SELECTOR_16BIT_FLOAT), PixelFormat::Rgba16Float);
        assert_eq!(output_format(SELECTOR_8BIT), PixelFormat::Rgba8Unorm);
    }

    #[test]
    fn unknown_selector_defaults_to_10bit() {
        for selector in [-1, 3, 42, i32::MAX, i32::MIN] {
            assert_eq!(output_format(selector), PixelFormat::Rgb10A2Unorm);
            assert_eq!(output_color_space(selector), ColorSpace::Hdr10);
        }
    }

    #[test]
    fn color_space_follows_format() {
        assert_eq!(output_color_space(SELECTOR_10BIT), ColorSpace::Hdr10);
        assert_eq!(output_color_space(SELECTOR_16BIT_FLOAT), ColorSpace::ScRgbLinear);
        assert_eq!(output_color_space(SELECTOR_8BIT), ColorSpace::Srgb);
        assert!(!STANDARD_COLOR_SPACE.is_hdr());
    }

    #[test]
    fn bits_per_channel() {
        for selector in DEFINED_SELECTORS {
            assert!(output_format(selector).bits_per_channel().is_some());
        }
        assert_eq!(PixelFormat::Other(87).bits_per_channel(), None);
    }

    #[test]
    fn only_named_formats_are_presentable() {
        assert!(PixelFormat::Bgra8Unorm.is_presentable());
        assert!(PixelFormat::Rgba16Float.is_presentable());
        assert!(!PixelFormat::Other(87).is_presentable());
    }
}
