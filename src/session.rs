//! A reading session: one open document and its chapter window.
//!
//! The session owns every collaborator explicitly. The HTTP client (and its
//! cookie jar), the content store and the cancellation token are built here
//! and passed down instead of living in globals.

use crate::cancellation::CancellationToken;
use crate::chapter_index::resolve_index;
use crate::config::AppConfig;
use crate::fetch::FetchCoordinator;
use crate::pagination::{
    ChapterLabeler, PaginationController, PaginationSettings, ReaderEvent, ScrollAction,
    ScrollPosition,
};
use crate::store::{ContentStore, FsContentStore};
use crate::transport::{HttpTransport, Transport};
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const UNKNOWN_TITLE: &str = "Unknown title";
const UNKNOWN_AUTHOR: &str = "Unknown author";

/// What the reader asked to open.
#[derive(Debug, Clone, Default)]
pub struct DocumentRequest {
    pub name: Option<String>,
    pub author: Option<String>,
    /// Server-side reference of the book, sent with every request.
    pub source_ref: String,
    pub start_index: usize,
}

impl DocumentRequest {
    /// Cache namespace; falls back to the source reference for unnamed books.
    pub fn document_id(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.source_ref.trim())
    }

    pub fn title_line(&self) -> String {
        let name = non_empty(self.name.as_deref()).unwrap_or(UNKNOWN_TITLE);
        let author = non_empty(self.author.as_deref()).unwrap_or(UNKNOWN_AUTHOR);
        format!("{name} — {author}")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct ReaderSession {
    title: String,
    controller: PaginationController,
    cancel: CancellationToken,
}

impl ReaderSession {
    /// Open against the configured server and on-disk cache.
    pub fn open(config: &AppConfig, request: DocumentRequest) -> Result<Self> {
        if config.server_url.trim().is_empty() || request.source_ref.trim().is_empty() {
            bail!("missing required parameters: server url and book reference are both needed");
        }
        let transport = HttpTransport::new(&config.server_url, config.request_timeout())
            .context("failed to set up server connection")?;
        let store = FsContentStore::new(&config.cache_dir);
        info!(
            server = %transport.base_url(),
            cache = %store.root().display(),
            "Opening reading session"
        );
        Self::open_with(config, request, Arc::new(store), Arc::new(transport))
    }

    /// Open with explicit collaborators.
    ///
    /// Fails when the chapter list cannot be obtained; nothing else is
    /// attempted in that case.
    pub fn open_with(
        config: &AppConfig,
        request: DocumentRequest,
        store: Arc<dyn ContentStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let source_ref = request.source_ref.trim();
        if source_ref.is_empty() {
            bail!("missing required parameters: book reference is empty");
        }
        let document_id = request.document_id().to_string();
        let index = resolve_index(store.as_ref(), transport.as_ref(), &document_id, source_ref)?;

        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(store, transport, cancel.clone());
        let settings = PaginationSettings {
            labeler: ChapterLabeler::new(&config.chapter_label),
            separator: config.chapter_separator.clone(),
        };
        let mut controller = PaginationController::new(
            index,
            source_ref,
            coordinator,
            settings,
            request.start_index,
        )?;
        controller.begin();
        info!(
            document = %document_id,
            chapters = controller.chapter_index().len(),
            start = request.start_index,
            "Session opened"
        );

        Ok(Self {
            title: request.title_line(),
            controller,
            cancel,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn controller(&self) -> &PaginationController {
        &self.controller
    }

    /// Token that tears the session down when cancelled, e.g. from a signal
    /// handler.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn scroll(&mut self, position: ScrollPosition) -> ScrollAction {
        self.controller.handle_scroll(position)
    }

    pub fn pump(&mut self, events: &mut Vec<ReaderEvent>) -> usize {
        self.controller.pump(events)
    }

    pub fn wait(&mut self, timeout: Duration, events: &mut Vec<ReaderEvent>) -> usize {
        self.controller.wait(timeout, events)
    }

    pub fn text(&self) -> String {
        self.controller.buffer().text()
    }

    pub fn close(mut self) {
        self.controller.shutdown();
    }
}
