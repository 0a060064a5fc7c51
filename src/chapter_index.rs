//! Ordered chapter list of one document.
//!
//! Resolved once per session: the store copy wins when it is present and
//! well-formed, otherwise the list is fetched, validated and persisted before
//! it is handed out. The list never changes afterwards.

use crate::error::LoadError;
use crate::store::{ContentStore, StoreKey};
use crate::transport::Transport;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterDescriptor {
    pub index: usize,
    pub title: String,
    #[serde(rename = "url")]
    pub source_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterIndex {
    document_id: String,
    chapters: Vec<ChapterDescriptor>,
}

impl ChapterIndex {
    /// `chapters` must be non-empty and numbered by position.
    pub fn new(document_id: &str, chapters: Vec<ChapterDescriptor>) -> Result<Self, LoadError> {
        validate_order(&chapters)?;
        Ok(Self {
            document_id: document_id.to_string(),
            chapters,
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn chapters(&self) -> &[ChapterDescriptor] {
        &self.chapters
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.chapters.len().saturating_sub(1)
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.chapters.len()
    }

    pub fn get(&self, index: usize) -> Option<&ChapterDescriptor> {
        self.chapters.get(index)
    }
}

/// Resolve the chapter list for `document_id`, store first, network second.
///
/// Calling this again after a successful resolution never touches the
/// network.
pub fn resolve_index(
    store: &dyn ContentStore,
    transport: &dyn Transport,
    document_id: &str,
    source_ref: &str,
) -> Result<ChapterIndex, LoadError> {
    let key = StoreKey::index(document_id);
    if let Some(index) = load_cached(store, &key, document_id) {
        info!(
            document = %document_id,
            chapters = index.len(),
            "Loaded chapter list from cache"
        );
        return Ok(index);
    }

    debug!(document = %document_id, %source_ref, "Requesting chapter list");
    let body = transport.chapter_list(source_ref).map_err(|err| {
        warn!(document = %document_id, "Chapter list request failed: {err:#}");
        LoadError::IndexUnavailable {
            document: document_id.to_string(),
            reason: format!("{err:#}"),
        }
    })?;
    let index = parse_list_body(&body)
        .and_then(|chapters| ChapterIndex::new(document_id, chapters))
        .map_err(|err| {
            warn!(document = %document_id, "Rejected chapter list: {err}");
            err.into_index_unavailable(document_id)
        })?;

    match serde_json::to_vec(index.chapters()) {
        Ok(bytes) => {
            if let Err(err) = store.write(&key, &bytes) {
                warn!(document = %document_id, "Failed to cache chapter list: {err:#}");
            }
        }
        Err(err) => warn!(document = %document_id, "Failed to encode chapter list: {err}"),
    }
    info!(
        document = %document_id,
        chapters = index.len(),
        "Fetched chapter list from server"
    );
    Ok(index)
}

fn load_cached(
    store: &dyn ContentStore,
    key: &StoreKey,
    document_id: &str,
) -> Option<ChapterIndex> {
    let bytes = match store.read(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            warn!(key = %key, "Failed to read cached chapter list: {err:#}");
            return None;
        }
    };
    let parsed = serde_json::from_slice::<serde_json::Value>(&bytes)
        .map_err(|err| LoadError::malformed(err.to_string()))
        .and_then(|value| parse_descriptors(&value))
        .and_then(|chapters| ChapterIndex::new(document_id, chapters));
    match parsed {
        Ok(index) => Some(index),
        Err(err) => {
            warn!(key = %key, "Ignoring cached chapter list: {err}");
            None
        }
    }
}

/// Parse a `{"data": [...]}` chapter list body.
pub fn parse_list_body(body: &str) -> Result<Vec<ChapterDescriptor>, LoadError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| LoadError::malformed(err.to_string()))?;
    let data = value
        .get("data")
        .ok_or_else(|| LoadError::malformed("missing `data` field"))?;
    parse_descriptors(data)
}

fn parse_descriptors(value: &serde_json::Value) -> Result<Vec<ChapterDescriptor>, LoadError> {
    let rows = value
        .as_array()
        .ok_or_else(|| LoadError::malformed("chapter list is not an array"))?;
    rows.iter()
        .enumerate()
        .map(|(position, row)| parse_descriptor(position, row))
        .collect()
}

fn parse_descriptor(
    position: usize,
    row: &serde_json::Value,
) -> Result<ChapterDescriptor, LoadError> {
    if !row.is_object() {
        return Err(LoadError::malformed(format!(
            "chapter entry {position} is not an object"
        )));
    }
    let index = row
        .get("index")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            LoadError::malformed(format!("chapter entry {position} has no numeric `index`"))
        })?;
    Ok(ChapterDescriptor {
        index: index as usize,
        title: string_field(row, "title"),
        source_ref: string_field(row, "url"),
    })
}

fn string_field(row: &serde_json::Value, key: &str) -> String {
    row.get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn validate_order(chapters: &[ChapterDescriptor]) -> Result<(), LoadError> {
    if chapters.is_empty() {
        return Err(LoadError::malformed("chapter list is empty"));
    }
    if let Some((position, chapter)) = chapters
        .iter()
        .enumerate()
        .find(|(position, chapter)| chapter.index != *position)
    {
        return Err(LoadError::malformed(format!(
            "chapter at position {position} claims index {}",
            chapter.index
        )));
    }
    Ok(())
}
