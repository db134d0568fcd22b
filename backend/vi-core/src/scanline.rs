//! Per-scanline register sessions.
//!
//! During active display traversal the driver may rewrite a small set of registers between
//! scanlines. A session records those rewrites into bounded per-line tables so that decode can
//! later resolve the effective value for every output scanline without re-running the traversal.

use crate::registers::{RegisterFile, ViRegister};
use crate::MAX_OUTPUT_SCANLINES;
use bincode::{Decode, Encode};

pub const PER_SCANLINE_H_START_BIT: u32 = 1 << 0;
pub const PER_SCANLINE_X_SCALE_BIT: u32 = 1 << 1;

pub type PerScanlineFlags = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerScanlineRegister {
    HStart,
    XScale,
}

impl PerScanlineRegister {
    #[must_use]
    pub const fn flag_bit(self) -> u32 {
        match self {
            Self::HStart => PER_SCANLINE_H_START_BIT,
            Self::XScale => PER_SCANLINE_X_SCALE_BIT,
        }
    }

    const fn static_register(self) -> ViRegister {
        match self {
            Self::HStart => ViRegister::HStart,
            Self::XScale => ViRegister::XScale,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct TrackedRegister {
    latched: u32,
    pending: u32,
    // Stale entries past the latch cursor are never read; reset only reseeds the latch values.
    lines: [u32; MAX_OUTPUT_SCANLINES],
}

impl TrackedRegister {
    fn new() -> Self {
        Self { latched: 0, pending: 0, lines: [0; MAX_OUTPUT_SCANLINES] }
    }

    fn reset(&mut self, value: u32) {
        self.latched = value;
        self.pending = value;
    }

    fn latch(&mut self, from_line: usize, line: usize) {
        for slot in &mut self.lines[from_line..line] {
            *slot = self.latched;
        }
        self.lines[line] = self.pending;
        self.latched = self.pending;
    }
}

/// State machine: Closed -> (begin) -> Open -> (end) -> Closed.
///
/// While open, `set` updates a pending value and `latch` commits it for one output scanline,
/// also becoming the fallback for every line latched after it. Lines before the first latch
/// inherit the static register value captured at `begin` time.
#[derive(Debug, Clone, Encode, Decode)]
pub struct PerScanlineSession {
    flags: PerScanlineFlags,
    open: bool,
    next_line: u32,
    h_start: TrackedRegister,
    x_scale: TrackedRegister,
}

impl PerScanlineSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: 0,
            open: false,
            next_line: 0,
            h_start: TrackedRegister::new(),
            x_scale: TrackedRegister::new(),
        }
    }

    /// Opens a traversal, tracking the registers named in `flags`.
    ///
    /// Re-opening an already-open session silently resets it.
    pub fn begin(&mut self, flags: PerScanlineFlags, registers: &RegisterFile) {
        if self.open {
            log::warn!("Per-scanline session re-opened while still open; resetting");
        }

        self.flags = flags;
        self.open = true;
        self.next_line = 0;
        self.h_start.reset(registers.read(PerScanlineRegister::HStart.static_register()));
        self.x_scale.reset(registers.read(PerScanlineRegister::XScale.static_register()));
    }

    pub fn set(&mut self, register: PerScanlineRegister, value: u32) {
        if !self.open {
            log::warn!("Per-scanline set({register:?}, {value:08X}) outside an open session");
            return;
        }

        self.tracker_mut(register).pending = value;
    }

    /// Commits the pending values for output scanline `line`. Unlatched lines between the
    /// previous latch and this one are filled with the previous latched value.
    pub fn latch(&mut self, line: u32) {
        if !self.open {
            log::warn!("Per-scanline latch({line}) outside an open session");
            return;
        }

        let line = (line as usize).min(MAX_OUTPUT_SCANLINES - 1);
        let from_line = (self.next_line as usize).min(line);

        if self.flags & PER_SCANLINE_H_START_BIT != 0 {
            self.h_start.latch(from_line, line);
        }
        if self.flags & PER_SCANLINE_X_SCALE_BIT != 0 {
            self.x_scale.latch(from_line, line);
        }

        self.next_line = self.next_line.max(line as u32 + 1);
    }

    /// Closes the traversal, freezing the tables for decode.
    pub fn end(&mut self) {
        if !self.open {
            log::warn!("Per-scanline end() without an open session");
        }
        self.open = false;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn flags(&self) -> PerScanlineFlags {
        self.flags
    }

    /// Effective value of `register` for output scanline `line`, or None if the register was
    /// not tracked by the most recent session (callers fall back to the static register file).
    #[must_use]
    pub fn resolve(&self, register: PerScanlineRegister, line: u32) -> Option<u32> {
        if self.flags & register.flag_bit() == 0 {
            return None;
        }

        let tracker = self.tracker(register);
        let line = (line as usize).min(MAX_OUTPUT_SCANLINES - 1);
        Some(if (line as u32) < self.next_line { tracker.lines[line] } else { tracker.latched })
    }

    fn tracker(&self, register: PerScanlineRegister) -> &TrackedRegister {
        match register {
            PerScanlineRegister::HStart => &self.h_start,
            PerScanlineRegister::XScale => &self.x_scale,
        }
    }

    fn tracker_mut(&mut self, register: PerScanlineRegister) -> &mut TrackedRegister {
        match register {
            PerScanlineRegister::HStart => &mut self.h_start,
            PerScanlineRegister::XScale => &mut self.x_scale,
        }
    }
}

impl Default for PerScanlineSession {
    fn default() -> Self {
        Self::new()
    }
}
