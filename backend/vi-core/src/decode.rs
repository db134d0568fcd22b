//! Pure decode of the register file (plus any per-scanline session) into the parameter set
//! consumed by the GPU pipeline.
//!
//! Decode never fails: malformed register combinations clamp into degenerate geometry that
//! still produces a deterministic image, because the original hardware never errors.

use crate::options::ScanoutOptions;
use crate::registers::{ControlFlags, PixelFormat, RegisterFile, ViRegister};
use crate::scanline::{PerScanlineRegister, PerScanlineSession};
use crate::MAX_OUTPUT_SCANLINES;
use bytemuck::{Pod, Zeroable};

// First visible dot / half-line of active video for each TV standard.
const NTSC_H_OFFSET: i32 = 108;
const PAL_H_OFFSET: i32 = 128;
const NTSC_V_OFFSET: i32 = 34;
const PAL_V_OFFSET: i32 = 44;

// NTSC fields are 0x20D half-lines; anything past this is a PAL sync configuration.
const PAL_V_SYNC_THRESHOLD: u32 = 550;

// Upper bound on the source lines one scanout can fetch (10-bit line counters).
const MAX_FETCH_LINES: i32 = 1024;
const MAX_FETCH_WIDTH: i32 = 2048;

/// Per-output-scanline fixed-point sampling parameters.
///
/// X/Y steps are 2.10 fixed point: 0x400 is one source pixel per output dot. Laid out for
/// direct upload into the scale stage's storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct HorizontalInfoLine {
    pub h_start: i32,
    pub h_start_clamp: i32,
    pub h_end_clamp: i32,
    pub x_start: i32,
    pub x_add: i32,
    pub y_start: i32,
    pub y_add: i32,
    pub y_base: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HorizontalInfoLines {
    pub lines: Box<[HorizontalInfoLine; MAX_OUTPUT_SCANLINES]>,
}

impl HorizontalInfoLines {
    #[must_use]
    pub fn new_zeroed() -> Self {
        Self { lines: Box::new([HorizontalInfoLine::default(); MAX_OUTPUT_SCANLINES]) }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.lines.as_slice())
    }
}

impl Default for HorizontalInfoLines {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

/// Everything the pipeline stages need to know about the current register state. Immutable
/// once decoded; fully determined by the register file, the per-scanline session, the scanout
/// options, and the upscale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedRegisters {
    pub control: ControlFlags,
    /// Framebuffer stride in pixels.
    pub vi_width: i32,
    /// Byte offset of the framebuffer within RDRAM.
    pub vi_offset: u32,
    /// Field bit of VI_V_CURRENT: which field of an interlaced frame is being scanned.
    pub v_current_field: i32,
    pub is_pal: bool,
    /// Initial Y accumulator (2.10 fixed point) from VI_Y_SCALE's offset half.
    pub init_y_add: i32,
    pub h_start: i32,
    pub h_res: i32,
    pub v_start: i32,
    pub v_res: i32,
    /// Scale-pass scissor box, in upscaled scale-stage output pixels.
    pub h_start_clamp: i32,
    pub h_res_clamp: i32,
    pub v_start_clamp: i32,
    pub v_res_clamp: i32,
    /// Static X/Y steps (2.10 fixed point) before per-scanline overrides.
    pub x_add: i32,
    pub y_add: i32,
    /// Inclusive source-image bounds for the AA stages.
    pub max_x: i32,
    pub max_y: i32,
}

impl DecodedRegisters {
    /// Whether this register combination cannot produce a visible image. The pipeline still
    /// produces a deterministic (black) output in that case; the frame manager uses this to
    /// apply the persistence policy.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.h_res <= 0
            || self.v_res <= 0
            || self.x_add == 0
            || !self.control.format.is_displayable()
    }

    /// Byte offset/length of the RDRAM region the next scanout will read.
    #[must_use]
    pub fn scanout_memory_range(&self) -> (u32, u32) {
        let bytes_per_pixel = self.control.format.bytes_per_pixel();
        let length = (self.max_y as u32 + 1) * self.vi_width as u32 * bytes_per_pixel;
        (self.vi_offset, length)
    }
}

/// Decodes the register file into pipeline parameters plus one `HorizontalInfoLine` per
/// output scanline. Pure: identical inputs always produce identical outputs.
#[must_use]
pub fn decode_registers(
    registers: &RegisterFile,
    per_line: &PerScanlineSession,
    options: &ScanoutOptions,
    scale_factor: u32,
) -> (DecodedRegisters, HorizontalInfoLines) {
    let scale = scale_factor.max(1) as i32;
    let control = ControlFlags::from_raw(registers.read(ViRegister::Control));
    let interlaced = control.serrate && options.features.serrate;

    let is_pal = (registers.read(ViRegister::VSync) & 0x3FF) > PAL_V_SYNC_THRESHOLD;
    let h_offset = if is_pal { PAL_H_OFFSET } else { NTSC_H_OFFSET };
    let v_offset = if is_pal { PAL_V_OFFSET } else { NTSC_V_OFFSET };

    let h_start_reg = registers.read(ViRegister::HStart);
    let v_start_reg = registers.read(ViRegister::VStart);
    let x_scale_reg = registers.read(ViRegister::XScale);
    let y_scale_reg = registers.read(ViRegister::YScale);

    let h_start = ((h_start_reg >> 16) & 0x3FF) as i32 - h_offset;
    let h_end = (h_start_reg & 0x3FF) as i32 - h_offset;
    let v_start_raw = ((v_start_reg >> 16) & 0x3FF) as i32 - v_offset;
    let v_end_raw = (v_start_reg & 0x3FF) as i32 - v_offset;

    let h_res = h_end - h_start;
    // Vertical counters are in half-lines.
    let v_start = v_start_raw >> 1;
    let v_res = (v_end_raw - v_start_raw) >> 1;

    let x_add = (x_scale_reg & 0xFFF) as i32;
    let x_start = ((x_scale_reg >> 16) & 0xFFF) as i32;
    let y_add = (y_scale_reg & 0xFFF) as i32;
    let init_y_add = ((y_scale_reg >> 16) & 0xFFF) as i32;

    let vi_width = (registers.read(ViRegister::Width) & 0xFFF) as i32;
    let vi_offset = registers.read(ViRegister::Origin) & 0x00FF_FFFF;
    let v_current_field = (registers.read(ViRegister::VCurrent) & 1) as i32;

    // Crop counts are given in original-resolution pixels. The explicit rectangle wins when
    // enabled; the legacy overscan crop trims left/right in an aspect-preserving way.
    let (crop_left, crop_right, mut crop_top, mut crop_bottom) = if options.crop_rect.enable {
        (
            options.crop_rect.left as i32,
            options.crop_rect.right as i32,
            options.crop_rect.top as i32,
            options.crop_rect.bottom as i32,
        )
    } else {
        let pixels = options.crop_overscan_pixels as i32;
        let horizontal = pixels * 4 / 3;
        (horizontal, horizontal, pixels, pixels)
    };

    if interlaced {
        crop_top *= 2;
        crop_bottom *= 2;
    }

    let h_start_clamp = crop_left * scale;
    let h_res_clamp = ((h_res - crop_left - crop_right) * scale).max(0);
    let v_start_clamp = crop_top * scale;
    let v_res_clamp = ((v_res - crop_top - crop_bottom) * scale).max(0);

    // Source lines the fetch stage must read: the Y accumulator's end position, plus one
    // line of slack for the filters' vertical neighbors.
    let fetch_lines = (((v_res.max(0) * y_add) >> 10) + 1).clamp(1, MAX_FETCH_LINES);
    let max_x = vi_width.clamp(1, MAX_FETCH_WIDTH) - 1;
    let max_y = fetch_lines - 1;

    let decoded = DecodedRegisters {
        control,
        vi_width,
        vi_offset,
        v_current_field,
        is_pal,
        init_y_add,
        h_start,
        h_res,
        v_start,
        v_res,
        h_start_clamp,
        h_res_clamp,
        v_start_clamp,
        v_res_clamp,
        x_add,
        y_add,
        max_x,
        max_y,
    };

    let mut lines = HorizontalInfoLines::new_zeroed();
    for (i, line) in lines.lines.iter_mut().enumerate() {
        let line_index = i as u32;
        let hs_reg =
            per_line.resolve(PerScanlineRegister::HStart, line_index).unwrap_or(h_start_reg);
        let xs_reg =
            per_line.resolve(PerScanlineRegister::XScale, line_index).unwrap_or(x_scale_reg);

        let line_h_start = ((hs_reg >> 16) & 0x3FF) as i32 - h_offset;
        let line_h_end = (hs_reg & 0x3FF) as i32 - h_offset;
        let y_accum = init_y_add + i as i32 * y_add;

        *line = HorizontalInfoLine {
            h_start: line_h_start,
            h_start_clamp: line_h_start.max(h_start),
            h_end_clamp: line_h_end.min(h_end),
            x_start: ((xs_reg >> 16) & 0xFFF) as i32,
            x_add: (xs_reg & 0xFFF) as i32,
            y_start: y_accum & 0x3FF,
            y_add,
            y_base: y_accum >> 10,
        };
    }

    (decoded, lines)
}

/// Original-hardware fetch bug: 16-bit fetches happen in eight-word bursts, and when a line
/// consumes more than two source pixels per output dot the prefetcher falls behind and
/// re-reads the previous burst, duplicating a column of pixels. Only observable at native
/// scale; the fetch stage must reproduce the corruption, not correct it.
#[must_use]
pub fn needs_fetch_bug_emulation(registers: &DecodedRegisters, scale_factor: u32) -> bool {
    scale_factor <= 1
        && registers.control.format == PixelFormat::Rgba5551
        && registers.x_add > 0x800
}
