//! Scanout outputs and cross-frame state.
//!
//! The frame manager retains the previous frame for weave deinterlacing and the
//! persistence policy, and hands out completion signals tied to GPU submissions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once the GPU has finished producing the associated output.
///
/// Clones share the flag. The signal flips on the device's callback thread, so it is safe
/// to poll from a different thread than the one that submitted the work.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    complete: Arc<AtomicBool>,
}

impl CompletionSignal {
    /// Registers a signal against the most recent submission on `queue`.
    pub(crate) fn register(queue: &wgpu::Queue) -> Self {
        let complete = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&complete);
        queue.on_submitted_work_done(move || {
            flag.store(true, Ordering::Release);
        });
        Self { complete }
    }

    #[cfg(test)]
    fn already_complete() -> Self {
        Self { complete: Arc::new(AtomicBool::new(true)) }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

/// One produced frame: a GPU texture plus its dimensions and completion signal.
#[derive(Debug, Clone)]
pub struct ScanoutImage {
    pub texture: Arc<wgpu::Texture>,
    pub width: u32,
    pub height: u32,
    pub completion: CompletionSignal,
}

/// An exported scanout: tightly meaningful RGBA8 rows inside a mappable buffer.
///
/// Rows are padded to `row_pitch` bytes to satisfy the GPU's copy alignment; consumers must
/// use the pitch, not `width * 4`, when walking rows.
#[derive(Debug)]
pub struct ScanoutBuffer {
    pub buffer: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    pub completion: CompletionSignal,
}

/// Retains frames across scanouts.
///
/// `previous` feeds weave deinterlacing and previous-frame blending; it is also what the
/// persistence policy re-returns when register state goes degenerate. Frames the caller may
/// still be reading are parked in `retired` until their submissions complete.
#[derive(Debug, Default)]
pub struct FrameManager {
    previous: Option<ScanoutImage>,
    previous_blank: bool,
    retired: Vec<ScanoutImage>,
    frame_count: u64,
    last_valid_frame_count: u64,
}

impl FrameManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn previous_frame(&self) -> Option<&ScanoutImage> {
        self.previous.as_ref()
    }

    /// Whether the previous scanout produced no visible image. Weave deinterlacing and
    /// previous-frame blending fall back to the current field when this is set.
    #[must_use]
    pub fn previous_frame_blank(&self) -> bool {
        self.previous_blank
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[must_use]
    pub fn last_valid_frame_count(&self) -> u64 {
        self.last_valid_frame_count
    }

    /// Records the outcome of a scanout. `blank` marks frames with degenerate register
    /// state; those still advance `frame_count` but not `last_valid_frame_count`.
    pub fn complete_frame(&mut self, image: ScanoutImage, blank: bool) {
        self.frame_count += 1;
        if !blank {
            self.last_valid_frame_count = self.frame_count;
        }

        if let Some(old) = self.previous.replace(image) {
            self.retired.push(old);
        }
        self.previous_blank = blank;
        self.reclaim();
    }

    /// Re-returns the previous frame without advancing valid-frame accounting. The clone
    /// keeps the frame's original completion signal: its GPU work may still be in flight.
    pub fn persist_previous(&mut self) -> Option<ScanoutImage> {
        self.frame_count += 1;
        self.reclaim();
        self.previous.clone()
    }

    fn reclaim(&mut self) {
        // External holders keep the texture alive through their own Arc; this list only
        // guards frames the GPU may still be reading.
        self.retired.retain(|image| !image.completion.is_complete());
    }
}
