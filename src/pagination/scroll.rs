//! Scroll signal interpretation, kept free of any UI type.

use super::{LoadState, LoadWindow};

/// Vertical scroll geometry reported by the presentation layer, in the same
/// unit for all three fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPosition {
    pub offset: f32,
    pub viewport_height: f32,
    pub content_height: f32,
}

impl ScrollPosition {
    pub fn new(offset: f32, viewport_height: f32, content_height: f32) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.max(0.0) } else { 0.0 };
        Self {
            offset: clamp(offset),
            viewport_height: clamp(viewport_height),
            content_height: clamp(content_height),
        }
    }

    /// Scrolled all the way up.
    pub fn top(viewport_height: f32, content_height: f32) -> Self {
        Self::new(0.0, viewport_height, content_height)
    }

    /// Scrolled all the way down.
    pub fn bottom(viewport_height: f32, content_height: f32) -> Self {
        Self::new(
            (content_height - viewport_height).max(0.0),
            viewport_height,
            content_height,
        )
    }

    pub fn at_top(&self) -> bool {
        self.offset <= 0.0
    }

    pub fn at_bottom(&self) -> bool {
        self.offset + self.viewport_height >= self.content_height
    }
}

/// Snapshot of controller state that a scroll decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub state: LoadState,
    /// `None` until the opening chapter is resident.
    pub window: Option<LoadWindow>,
    pub start_index: usize,
    pub last_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    None,
    /// A fetch is outstanding; the signal is dropped, not queued.
    Busy,
    LoadInitial(usize),
    LoadBackward(usize),
    LoadForward(usize),
}

/// Decide what a scroll signal asks for.
///
/// The top edge is checked first; one signal yields at most one load.
pub fn evaluate_scroll(position: ScrollPosition, window_state: &WindowState) -> ScrollAction {
    if !window_state.state.is_idle() {
        return ScrollAction::Busy;
    }
    let Some(window) = window_state.window else {
        return ScrollAction::LoadInitial(window_state.start_index);
    };
    if position.at_top() && window.low_index() > 0 {
        return ScrollAction::LoadBackward(window.low_index() - 1);
    }
    if position.at_bottom() && window.high_index() < window_state.last_index {
        return ScrollAction::LoadForward(window.high_index() + 1);
    }
    ScrollAction::None
}
