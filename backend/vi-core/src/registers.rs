//! The raw VI register file and the decoded view of the control register.

use crate::num::GetBit;
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

pub const VI_REGISTER_COUNT: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum ViRegister {
    Control,
    Origin,
    Width,
    VInterrupt,
    VCurrent,
    Burst,
    VSync,
    HSync,
    Leap,
    HStart,
    VStart,
    VBurst,
    XScale,
    YScale,
}

impl ViRegister {
    pub const ALL: [Self; VI_REGISTER_COUNT] = [
        Self::Control,
        Self::Origin,
        Self::Width,
        Self::VInterrupt,
        Self::VCurrent,
        Self::Burst,
        Self::VSync,
        Self::HSync,
        Self::Leap,
        Self::HStart,
        Self::VStart,
        Self::VBurst,
        Self::XScale,
        Self::YScale,
    ];

    #[must_use]
    pub const fn to_index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl Display for ViRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "VI_CONTROL"),
            Self::Origin => write!(f, "VI_ORIGIN"),
            Self::Width => write!(f, "VI_WIDTH"),
            Self::VInterrupt => write!(f, "VI_V_INTR"),
            Self::VCurrent => write!(f, "VI_V_CURRENT"),
            Self::Burst => write!(f, "VI_BURST"),
            Self::VSync => write!(f, "VI_V_SYNC"),
            Self::HSync => write!(f, "VI_H_SYNC"),
            Self::Leap => write!(f, "VI_H_SYNC_LEAP"),
            Self::HStart => write!(f, "VI_H_START"),
            Self::VStart => write!(f, "VI_V_START"),
            Self::VBurst => write!(f, "VI_V_BURST"),
            Self::XScale => write!(f, "VI_X_SCALE"),
            Self::YScale => write!(f, "VI_Y_SCALE"),
        }
    }
}

/// Fixed-size store of the authoritative register values. Writes land at arbitrary times from
/// the external driver; decode only ever reads.
#[derive(Debug, Clone, Encode, Decode)]
pub struct RegisterFile {
    values: [u32; VI_REGISTER_COUNT],
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> Self {
        Self { values: [0; VI_REGISTER_COUNT] }
    }

    pub fn write(&mut self, register: ViRegister, value: u32) {
        log::trace!("{register} = {value:08X}");
        self.values[register.to_index()] = value;
    }

    #[must_use]
    pub fn read(&self, register: ViRegister) -> u32 {
        self.values[register.to_index()]
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum PixelFormat {
    #[default]
    Blank,
    Reserved,
    Rgba5551,
    Rgba8888,
}

impl PixelFormat {
    #[must_use]
    pub fn from_control(control: u32) -> Self {
        match control & 0x3 {
            0 => Self::Blank,
            1 => Self::Reserved,
            2 => Self::Rgba5551,
            3 => Self::Rgba8888,
            _ => unreachable!("value was masked with 0x3"),
        }
    }

    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Blank | Self::Reserved => 0,
            Self::Rgba5551 => 2,
            Self::Rgba8888 => 4,
        }
    }

    #[must_use]
    pub const fn is_displayable(self) -> bool {
        matches!(self, Self::Rgba5551 | Self::Rgba8888)
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank => write!(f, "Blank"),
            Self::Reserved => write!(f, "Reserved"),
            Self::Rgba5551 => write!(f, "RGBA5551 (16bpp)"),
            Self::Rgba8888 => write!(f, "RGBA8888 (32bpp)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum AaMode {
    #[default]
    AaResampleAlways,
    AaResampleAsNeeded,
    ResampleOnly,
    Replicate,
}

impl AaMode {
    #[must_use]
    pub fn from_control(control: u32) -> Self {
        match control.bits(8..=9) {
            0 => Self::AaResampleAlways,
            1 => Self::AaResampleAsNeeded,
            2 => Self::ResampleOnly,
            3 => Self::Replicate,
            _ => unreachable!("value was masked to 2 bits"),
        }
    }

    #[must_use]
    pub const fn aa_enabled(self) -> bool {
        matches!(self, Self::AaResampleAlways | Self::AaResampleAsNeeded)
    }

    #[must_use]
    pub const fn resample_enabled(self) -> bool {
        !matches!(self, Self::Replicate)
    }
}

impl Display for AaMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AaResampleAlways => write!(f, "AA + resample, always fetch"),
            Self::AaResampleAsNeeded => write!(f, "AA + resample, fetch as needed"),
            Self::ResampleOnly => write!(f, "Resample only"),
            Self::Replicate => write!(f, "Replicate (no AA, no resample)"),
        }
    }
}

/// Decoded view of the VI control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags {
    pub format: PixelFormat,
    pub gamma_dither: bool,
    pub gamma: bool,
    pub divot: bool,
    pub serrate: bool,
    pub aa_mode: AaMode,
    pub dither_filter: bool,
}

impl ControlFlags {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            format: PixelFormat::from_control(raw),
            gamma_dither: raw.bit(2),
            gamma: raw.bit(3),
            divot: raw.bit(4),
            serrate: raw.bit(6),
            aa_mode: AaMode::from_control(raw),
            dither_filter: raw.bit(16),
        }
    }
}
