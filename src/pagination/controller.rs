use super::buffer::{AssembledBuffer, BufferMutation, ChapterLabeler, ChapterSection};
use super::scroll::{ScrollAction, ScrollPosition, WindowState, evaluate_scroll};
use super::{LoadState, LoadWindow};
use crate::chapter_index::ChapterIndex;
use crate::error::LoadError;
use crate::fetch::{ChapterContent, Dispatch, FetchCompletion, FetchCoordinator};
use anyhow::{Result, bail};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output of the controller, consumed by the presentation layer in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Mutation(BufferMutation),
    /// Transient failure; the window is unchanged.
    Notice(LoadError),
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub labeler: ChapterLabeler,
    pub separator: String,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            labeler: ChapterLabeler::default(),
            separator: "\n\n".to_string(),
        }
    }
}

/// Owns the chapter window of one open document.
///
/// Every method runs on the consumer thread. Fetch results come back through
/// a private completion queue and only touch state inside [`Self::pump`] or
/// [`Self::wait`], so window updates are never concurrent with each other.
pub struct PaginationController {
    index: ChapterIndex,
    source_ref: String,
    coordinator: FetchCoordinator,
    settings: PaginationSettings,
    completions_tx: Sender<FetchCompletion>,
    completions: Receiver<FetchCompletion>,
    state: LoadState,
    window: Option<LoadWindow>,
    start_index: usize,
    buffer: AssembledBuffer,
    closed: bool,
}

impl PaginationController {
    pub fn new(
        index: ChapterIndex,
        source_ref: &str,
        coordinator: FetchCoordinator,
        settings: PaginationSettings,
        start_index: usize,
    ) -> Result<Self> {
        if !index.contains(start_index) {
            bail!(
                "start chapter {start_index} is outside 0..={} of `{}`",
                index.last_index(),
                index.document_id()
            );
        }
        let (completions_tx, completions) = mpsc::channel();
        let buffer = AssembledBuffer::new(&settings.separator);
        Ok(Self {
            index,
            source_ref: source_ref.to_string(),
            coordinator,
            settings,
            completions_tx,
            completions,
            state: LoadState::Idle,
            window: None,
            start_index,
            buffer,
            closed: false,
        })
    }

    pub fn document_id(&self) -> &str {
        self.index.document_id()
    }

    pub fn chapter_index(&self) -> &ChapterIndex {
        &self.index
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn window(&self) -> Option<LoadWindow> {
        self.window
    }

    pub fn buffer(&self) -> &AssembledBuffer {
        &self.buffer
    }

    /// Closed by [`Self::shutdown`] or by cancelling the session token.
    pub fn is_closed(&self) -> bool {
        self.closed || self.coordinator.cancellation().is_cancelled()
    }

    pub fn window_state(&self) -> WindowState {
        WindowState {
            state: self.state,
            window: self.window,
            start_index: self.start_index,
            last_index: self.index.last_index(),
        }
    }

    /// Request the opening chapter; it arrives as a replace mutation.
    pub fn begin(&mut self) -> ScrollAction {
        if self.window.is_some() || !self.state.is_idle() {
            debug!(state = %self.state, "Opening chapter already requested");
            return ScrollAction::None;
        }
        let action = ScrollAction::LoadInitial(self.start_index);
        self.dispatch(action);
        action
    }

    /// Feed one scroll signal through the window policy.
    pub fn handle_scroll(&mut self, position: ScrollPosition) -> ScrollAction {
        if self.is_closed() {
            return ScrollAction::None;
        }
        let action = evaluate_scroll(position, &self.window_state());
        match action {
            ScrollAction::None => {}
            ScrollAction::Busy => {
                debug!(state = %self.state, "Dropped scroll signal while a chapter is loading");
            }
            _ => self.dispatch(action),
        }
        action
    }

    /// Apply every completion that has already arrived.
    pub fn pump(&mut self, events: &mut Vec<ReaderEvent>) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.apply_completion(completion, events);
            applied += 1;
        }
        applied
    }

    /// Block up to `timeout` for the next completion, then drain the rest.
    pub fn wait(&mut self, timeout: Duration, events: &mut Vec<ReaderEvent>) -> usize {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.apply_completion(completion, events);
                1 + self.pump(events)
            }
            Err(RecvTimeoutError::Timeout) => 0,
            // Unreachable while we hold a sender; treat like a timeout.
            Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Tear down: cancel in-flight fetches and ignore anything still queued.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.coordinator.shutdown();
        let discarded = self.completions.try_iter().count();
        info!(
            document = %self.document_id(),
            discarded,
            window = ?self.window,
            "Closed chapter window"
        );
        self.state = LoadState::Idle;
    }

    fn dispatch(&mut self, action: ScrollAction) {
        let (index, state) = match action {
            ScrollAction::LoadInitial(index) => (index, LoadState::AwaitingInitial),
            ScrollAction::LoadBackward(index) => (index, LoadState::AwaitingBackward),
            ScrollAction::LoadForward(index) => (index, LoadState::AwaitingForward),
            ScrollAction::None | ScrollAction::Busy => return,
        };
        assert!(
            self.index.contains(index),
            "chapter {index} requested outside 0..={}",
            self.index.last_index()
        );
        self.state = state;
        let dispatch = self.coordinator.fetch_chapter(
            self.index.document_id(),
            index,
            &self.source_ref,
            self.completions_tx.clone(),
        );
        debug!(
            document = %self.index.document_id(),
            index,
            state = %self.state,
            ?dispatch,
            "Requested chapter"
        );
        if dispatch == Dispatch::Cancelled {
            self.state = LoadState::Idle;
        }
    }

    fn expected_index(&self) -> Option<usize> {
        match (self.state, self.window) {
            (LoadState::AwaitingInitial, _) => Some(self.start_index),
            (LoadState::AwaitingBackward, Some(window)) => window.low_index().checked_sub(1),
            (LoadState::AwaitingForward, Some(window)) => Some(window.high_index() + 1),
            _ => None,
        }
    }

    fn apply_completion(&mut self, completion: FetchCompletion, events: &mut Vec<ReaderEvent>) {
        if self.is_closed() {
            return;
        }
        if completion.document_id != self.index.document_id()
            || self.expected_index() != Some(completion.index)
        {
            warn!(
                document = %completion.document_id,
                index = completion.index,
                state = %self.state,
                "Ignoring completion nobody is waiting for"
            );
            return;
        }

        let state = std::mem::take(&mut self.state);
        match completion.result {
            Ok(content) => {
                let mutation = self.merge(state, content);
                info!(
                    document = %self.index.document_id(),
                    index = mutation.index(),
                    kind = mutation.kind(),
                    window = ?self.window,
                    "Merged chapter into buffer"
                );
                events.push(ReaderEvent::Mutation(mutation));
            }
            Err(err) => {
                let err = err.into_content_unavailable(completion.index);
                warn!(
                    document = %self.index.document_id(),
                    index = completion.index,
                    "Chapter load failed; edge stays eligible for retry: {err}"
                );
                events.push(ReaderEvent::Notice(err));
            }
        }
    }

    fn merge(&mut self, state: LoadState, content: ChapterContent) -> BufferMutation {
        let title = self
            .index
            .get(content.index)
            .map(|chapter| chapter.title.as_str())
            .unwrap_or_default();
        let section = ChapterSection {
            index: content.index,
            label: self.settings.labeler.label(content.index, title),
            text: content.text,
        };
        match (state, self.window) {
            (LoadState::AwaitingBackward, Some(mut window)) => {
                window.grow_backward();
                self.window = Some(window);
                self.buffer.prepend(section)
            }
            (LoadState::AwaitingForward, Some(mut window)) => {
                window.grow_forward(self.index.last_index());
                self.window = Some(window);
                self.buffer.append(section)
            }
            _ => {
                self.window = Some(LoadWindow::single(section.index));
                self.buffer.replace(section)
            }
        }
    }
}

impl Drop for PaginationController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
