//! Diagnostics channel for shader-originated debug messages.
//!
//! Messages are delivered to an explicitly registered callback rather than through virtual
//! dispatch, decoupling diagnostics from the pipeline contract. They never affect output.

use std::fmt::{Debug, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMessage<'a> {
    pub tag: &'a str,
    pub code: u32,
    /// Shader invocation coordinate (x, y, z).
    pub coord: [u32; 3],
    pub words: &'a [u32],
}

type DebugCallback = Box<dyn FnMut(&DebugMessage<'_>) + Send>;

#[derive(Default)]
pub struct DebugChannel {
    callback: Option<DebugCallback>,
    coordinate_filter: Option<(u32, u32)>,
}

impl DebugChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: impl FnMut(&DebugMessage<'_>) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Only deliver messages originating from the given (x, y) coordinate.
    pub fn set_coordinate_filter(&mut self, filter: Option<(u32, u32)>) {
        self.coordinate_filter = filter;
    }

    pub fn message(&mut self, message: &DebugMessage<'_>) {
        if let Some((x, y)) = self.coordinate_filter {
            if message.coord[0] != x || message.coord[1] != y {
                return;
            }
        }

        match &mut self.callback {
            Some(callback) => callback(message),
            None => log::debug!(
                "[{}] code {} at ({}, {}, {}): {:X?}",
                message.tag,
                message.code,
                message.coord[0],
                message.coord[1],
                message.coord[2],
                message.words
            ),
        }
    }
}

impl Debug for DebugChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugChannel")
            .field("has_callback", &self.callback.is_some())
            .field("coordinate_filter", &self.coordinate_filter)
            .finish()
    }
}
