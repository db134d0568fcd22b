//! Per-scanout configuration supplied by the caller.

use std::fmt::{Display, Formatter};

/// Explicit crop rectangle, in original-resolution pixels. Takes priority over
/// `crop_overscan_pixels` when enabled. Top/bottom are doubled when the source is interlaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CropRect {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeinterlaceMode {
    /// Upscale vertically with a field-dependent half-line Y offset. Reference-accurate.
    #[default]
    UpscaleOffset,
    /// Temporal blend of the current field with the retained previous frame. Not
    /// reference-accurate; kept for compatibility and testing.
    Weave,
}

impl Display for DeinterlaceMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpscaleOffset => write!(f, "Upscale deinterlace"),
            Self::Weave => write!(f, "Weave"),
        }
    }
}

/// Per-feature enables for the filter stages. A disabled feature turns its stage into a
/// pass-through regardless of what the control register requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViFeatures {
    pub aa: bool,
    pub scale: bool,
    pub serrate: bool,
    pub dither_filter: bool,
    pub divot_filter: bool,
    pub gamma_dither: bool,
}

impl Default for ViFeatures {
    fn default() -> Self {
        Self {
            aa: true,
            scale: true,
            serrate: true,
            dither_filter: true,
            divot_filter: true,
            gamma_dither: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanoutOptions {
    /// Simple overscan crop: top/bottom by this many pixels, left/right in an
    /// aspect-preserving way. Ignored when `crop_rect.enable` is set. Pixel counts are in
    /// original-resolution units and are adjusted for the active upscale factor.
    pub crop_overscan_pixels: u32,
    pub crop_rect: CropRect,
    /// Number of box-filter halving passes applied after the scale stage.
    pub downscale_steps: u32,
    /// Keep returning the previous frame while register state is degenerate. Works around
    /// game bugs; considered a hack if enabled.
    pub persist_frame_on_invalid_input: bool,
    /// Blend the retained previous frame into the output, approximating display persistence.
    /// Only takes effect during [`DeinterlaceMode::Weave`] deinterlacing of an interlaced
    /// source; progressive scanouts ignore it.
    pub blend_previous_frame: bool,
    pub deinterlace: DeinterlaceMode,
    pub features: ViFeatures,
    /// Produce the scanout in an externally mappable buffer as well. Incompatible with
    /// `persist_frame_on_invalid_input`.
    pub export_scanout: bool,
}

impl Default for ScanoutOptions {
    fn default() -> Self {
        Self {
            crop_overscan_pixels: 0,
            crop_rect: CropRect::default(),
            downscale_steps: 0,
            persist_frame_on_invalid_input: false,
            blend_previous_frame: false,
            deinterlace: DeinterlaceMode::default(),
            features: ViFeatures::default(),
            export_scanout: false,
        }
    }
}
