//! Transport doubles shared by unit tests.

use crate::transport::Transport;
use anyhow::{Result, anyhow};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};
use std::time::Duration;

pub fn list_body(count: usize) -> String {
    let data: Vec<_> = (0..count)
        .map(|index| {
            json!({
                "index": index,
                "title": format!("t{index}"),
                "url": format!("c/{index}"),
            })
        })
        .collect();
    json!({ "data": data }).to_string()
}

pub fn content_body(text: &str) -> String {
    json!({ "data": text }).to_string()
}

/// Answers from per-chapter queues of scripted outcomes, counting calls.
///
/// A chapter with an exhausted queue fails like a dropped connection.
#[derive(Default)]
pub struct ScriptedTransport {
    list: Option<String>,
    contents: Mutex<HashMap<usize, VecDeque<Result<String, String>>>>,
    list_calls: AtomicUsize,
    content_calls: Mutex<Vec<usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(mut self, chapters: usize) -> Self {
        self.list = Some(list_body(chapters));
        self
    }

    pub fn with_content(self, index: usize, text: &str) -> Self {
        self.push(index, Ok(content_body(text)));
        self
    }

    pub fn with_raw_body(self, index: usize, body: &str) -> Self {
        self.push(index, Ok(body.to_string()));
        self
    }

    pub fn with_failure(self, index: usize) -> Self {
        self.push(index, Err("connection reset".to_string()));
        self
    }

    pub fn push(&self, index: usize, outcome: Result<String, String>) {
        self.contents
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push_back(outcome);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn content_calls(&self) -> Vec<usize> {
        self.content_calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn chapter_list(&self, _source_ref: &str) -> Result<String> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list.clone().ok_or_else(|| anyhow!("connection refused"))
    }

    fn chapter_content(&self, _source_ref: &str, index: usize) -> Result<String> {
        self.content_calls.lock().unwrap().push(index);
        let next = self
            .contents
            .lock()
            .unwrap()
            .get_mut(&index)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(body)) => Ok(body),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted response for chapter {index}")),
        }
    }
}

/// Holds every content request until the test opens the gate once per call.
pub struct GatedTransport {
    gate: Mutex<mpsc::Receiver<()>>,
    started: Mutex<mpsc::Sender<usize>>,
    calls: AtomicUsize,
}

pub struct GateHandle {
    release: mpsc::Sender<()>,
    started: mpsc::Receiver<usize>,
}

impl GatedTransport {
    pub fn new() -> (Self, GateHandle) {
        let (release, gate) = mpsc::channel();
        let (started_tx, started) = mpsc::channel();
        (
            Self {
                gate: Mutex::new(gate),
                started: Mutex::new(started_tx),
                calls: AtomicUsize::new(0),
            },
            GateHandle { release, started },
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GateHandle {
    /// Block until a request for some chapter has reached the transport.
    pub fn wait_started(&self) -> usize {
        self.started
            .recv_timeout(Duration::from_secs(5))
            .expect("no request reached the transport")
    }

    pub fn release_one(&self) {
        self.release.send(()).expect("gate closed");
    }
}

impl Transport for GatedTransport {
    fn chapter_list(&self, _source_ref: &str) -> Result<String> {
        Ok(list_body(3))
    }

    fn chapter_content(&self, _source_ref: &str, index: usize) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.lock().unwrap().send(index);
        self.gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| anyhow!("gate dropped"))?;
        Ok(content_body(&format!("gated {index}")))
    }
}
