//! Scroll-driven chapter window.
//!
//! The window is the contiguous run of chapters held in the assembled buffer.
//! It starts as the single chapter the reader opened and only ever grows, one
//! chapter at a time at either edge, as scroll signals reach the top or the
//! bottom of the loaded text.

mod buffer;
mod controller;
mod scroll;

pub use buffer::{AssembledBuffer, BufferMutation, ChapterLabeler, ChapterSection};
pub use controller::{PaginationController, PaginationSettings, ReaderEvent};
pub use scroll::{ScrollAction, ScrollPosition, WindowState, evaluate_scroll};

/// What the controller is waiting for. At most one fetch is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    AwaitingInitial,
    AwaitingBackward,
    AwaitingForward,
}

impl LoadState {
    pub fn is_idle(self) -> bool {
        self == LoadState::Idle
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LoadState::Idle => "idle",
            LoadState::AwaitingInitial => "awaiting-initial",
            LoadState::AwaitingBackward => "awaiting-backward",
            LoadState::AwaitingForward => "awaiting-forward",
        };
        write!(f, "{}", label)
    }
}

/// Closed range `[low_index, high_index]` of resident chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadWindow {
    low_index: usize,
    high_index: usize,
}

impl LoadWindow {
    pub fn single(index: usize) -> Self {
        Self {
            low_index: index,
            high_index: index,
        }
    }

    pub fn low_index(&self) -> usize {
        self.low_index
    }

    pub fn high_index(&self) -> usize {
        self.high_index
    }

    /// Number of resident chapters; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.high_index - self.low_index + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.low_index..=self.high_index).contains(&index)
    }

    fn grow_backward(&mut self) -> usize {
        assert!(self.low_index > 0, "window cannot grow before chapter 0");
        self.low_index -= 1;
        self.low_index
    }

    fn grow_forward(&mut self, last_index: usize) -> usize {
        assert!(
            self.high_index < last_index,
            "window cannot grow past chapter {last_index}"
        );
        self.high_index += 1;
        self.high_index
    }
}
