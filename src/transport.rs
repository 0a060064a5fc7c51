//! Network access to the book server.
//!
//! Two JSON POST endpoints are consumed: `getChapterList` and
//! `getBookContent`. Both answer with an envelope whose `data` field carries
//! the payload. A transport only moves bytes; interpreting the envelope is
//! left to the chapter index and the fetch coordinator.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const CHAPTER_LIST_ENDPOINT: &str = "getChapterList";
pub const CHAPTER_CONTENT_ENDPOINT: &str = "getBookContent";

/// Response envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// One attempt per call, no retry or backoff; callers decide when to try again.
pub trait Transport: Send + Sync {
    /// Raw body of the chapter list for `source_ref`.
    fn chapter_list(&self, source_ref: &str) -> Result<String>;

    /// Raw body of chapter `index` of `source_ref`.
    fn chapter_content(&self, source_ref: &str, index: usize) -> Result<String>;
}

/// Blocking reqwest client with its own cookie jar.
///
/// Constructed once per session and handed to whoever needs it, so cookies
/// set by the server are shared between list and content requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)
            .ok_or_else(|| anyhow!("server url must start with http:// or https://"))?;
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, endpoint: &str, payload: serde_json::Value) -> Result<String> {
        let url = endpoint_url(&self.base_url, endpoint);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{url} answered with status {status}"));
        }
        response
            .text()
            .with_context(|| format!("failed to read body from {url}"))
    }
}

impl Transport for HttpTransport {
    fn chapter_list(&self, source_ref: &str) -> Result<String> {
        self.post(CHAPTER_LIST_ENDPOINT, chapter_list_payload(source_ref))
    }

    fn chapter_content(&self, source_ref: &str, index: usize) -> Result<String> {
        self.post(
            CHAPTER_CONTENT_ENDPOINT,
            chapter_content_payload(source_ref, index),
        )
    }
}

pub fn normalize_base_url(raw: &str) -> Option<String> {
    let url = raw.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        None
    }
}

fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    format!("{base_url}/{endpoint}")
}

fn chapter_list_payload(source_ref: &str) -> serde_json::Value {
    json!({ "url": source_ref })
}

fn chapter_content_payload(source_ref: &str, index: usize) -> serde_json::Value {
    json!({ "url": source_ref, "index": index })
}
