//! CPU-side model of the video interface: the raw register file, per-scanline register
//! sessions, and the pure decode step that turns them into GPU pipeline parameters.

pub mod debug;
pub mod decode;
pub mod num;
pub mod options;
pub mod registers;
pub mod scanline;

/// Maximum number of output scanlines one scanout can produce (a full PAL frame).
pub const MAX_OUTPUT_SCANLINES: usize = 576;

pub use debug::{DebugChannel, DebugMessage};
pub use decode::{
    decode_registers, needs_fetch_bug_emulation, DecodedRegisters, HorizontalInfoLine,
    HorizontalInfoLines,
};
pub use options::{CropRect, DeinterlaceMode, ScanoutOptions, ViFeatures};
pub use registers::{AaMode, ControlFlags, PixelFormat, RegisterFile, ViRegister};
pub use scanline::{
    PerScanlineFlags, PerScanlineRegister, PerScanlineSession, PER_SCANLINE_H_START_BIT,
    PER_SCANLINE_X_SCALE_BIT,
};
