//! Fetch coordinator: cache-first, single-flight chapter loading.
//!
//! `fetch_chapter` never blocks on the network. Results are delivered as
//! [`FetchCompletion`] messages on the sender each caller supplies, so the
//! consumer drains them on its own thread in arrival order. Concurrent
//! requests for the same chapter share one network call and each caller
//! receives its own copy of the outcome exactly once.

use crate::cancellation::CancellationToken;
use crate::error::LoadError;
use crate::store::{ContentStore, StoreKey};
use crate::transport::{Envelope, Transport};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterContent {
    pub document_id: String,
    pub index: usize,
    pub text: String,
}

pub type FetchResult = Result<ChapterContent, LoadError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCompletion {
    pub document_id: String,
    pub index: usize,
    pub result: FetchResult,
}

pub type CompletionSender = mpsc::Sender<FetchCompletion>;

/// How a request was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Served from the store; the completion is already queued.
    CacheHit,
    /// A network request was started.
    Started,
    /// Joined an identical request that is still in flight.
    Coalesced,
    /// No worker thread could be started; the failure is already queued.
    SpawnFailed,
    /// The session is closed; nothing will be delivered.
    Cancelled,
}

type Waiters = HashMap<StoreKey, Vec<CompletionSender>>;

#[derive(Clone)]
pub struct FetchCoordinator {
    store: Arc<dyn ContentStore>,
    transport: Arc<dyn Transport>,
    in_flight: Arc<Mutex<Waiters>>,
    cancel: CancellationToken,
}

impl FetchCoordinator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn in_flight_count(&self) -> usize {
        self.waiters().len()
    }

    /// Stop delivering results; in-flight workers discard what they fetch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let dropped: usize = self.waiters().drain().map(|(_, waiters)| waiters.len()).sum();
        if dropped > 0 {
            info!(dropped, "Discarded pending chapter fetches on shutdown");
        }
    }

    pub fn fetch_chapter(
        &self,
        document_id: &str,
        index: usize,
        source_ref: &str,
        reply: CompletionSender,
    ) -> Dispatch {
        if self.cancel.is_cancelled() {
            debug!(document = %document_id, index, "Fetch requested after shutdown");
            return Dispatch::Cancelled;
        }
        let key = StoreKey::chapter(document_id, index);

        if let Some(text) = self.read_cached(&key) {
            return serve_cached(reply, &key, document_id, index, text);
        }

        let mut in_flight = self.waiters();
        let mut reply = match join_in_flight(&mut in_flight, &key, reply) {
            Ok(dispatch) => return dispatch,
            Err(reply) => reply,
        };
        // Workers persist before clearing their entry, so a fetch that
        // finished since the read above has left the chapter in the store.
        // Only a stat runs under the lock; the read happens outside it.
        if self.store.exists(&key) {
            drop(in_flight);
            if let Some(text) = self.read_cached(&key) {
                return serve_cached(reply, &key, document_id, index, text);
            }
            in_flight = self.waiters();
            reply = match join_in_flight(&mut in_flight, &key, reply) {
                Ok(dispatch) => return dispatch,
                Err(reply) => reply,
            };
        }

        in_flight.insert(key.clone(), vec![reply]);
        drop(in_flight);

        let worker = FetchWorker {
            key: key.clone(),
            document_id: document_id.to_string(),
            index,
            source_ref: source_ref.to_string(),
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            in_flight: Arc::clone(&self.in_flight),
            cancel: self.cancel.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("chapter-fetch-{index}"))
            .spawn(move || worker.run());
        self.worker_dispatch(&key, document_id, index, spawned.map(drop))
    }

    fn worker_dispatch(
        &self,
        key: &StoreKey,
        document_id: &str,
        index: usize,
        spawned: io::Result<()>,
    ) -> Dispatch {
        match spawned {
            Ok(()) => {
                info!(key = %key, "Requested chapter from server");
                Dispatch::Started
            }
            Err(err) => {
                warn!(key = %key, "Failed to spawn fetch worker: {err}");
                let failure = LoadError::ContentUnavailable {
                    index,
                    reason: format!("failed to spawn fetch worker: {err}"),
                };
                deliver(&self.in_flight, key, document_id, index, Err(failure));
                Dispatch::SpawnFailed
            }
        }
    }

    fn read_cached(&self, key: &StoreKey) -> Option<String> {
        match self.store.read(key) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Some(text),
                Err(err) => {
                    warn!(key = %key, "Cached chapter is not UTF-8, refetching: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, "Failed to read cached chapter: {err:#}");
                None
            }
        }
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        lock_waiters(&self.in_flight)
    }
}

struct FetchWorker {
    key: StoreKey,
    document_id: String,
    index: usize,
    source_ref: String,
    store: Arc<dyn ContentStore>,
    transport: Arc<dyn Transport>,
    in_flight: Arc<Mutex<Waiters>>,
    cancel: CancellationToken,
}

impl FetchWorker {
    fn run(self) {
        let result = self
            .transport
            .chapter_content(&self.source_ref, self.index)
            .map_err(|err| LoadError::ContentUnavailable {
                index: self.index,
                reason: format!("{err:#}"),
            })
            .and_then(|body| {
                parse_content_body(&body).map_err(|err| err.into_content_unavailable(self.index))
            });

        if let Err(err) = self.cancel.check_cancelled("persist") {
            debug!(key = %self.key, "Dropping fetched chapter: {err}");
            lock_waiters(&self.in_flight).remove(&self.key);
            return;
        }

        let result = match result {
            Ok(text) => {
                if let Err(err) = self.store.write(&self.key, text.as_bytes()) {
                    warn!(key = %self.key, "Failed to cache chapter: {err:#}");
                }
                Ok(ChapterContent {
                    document_id: self.document_id.clone(),
                    index: self.index,
                    text,
                })
            }
            Err(err) => {
                warn!(key = %self.key, "Chapter fetch failed: {err}");
                Err(err)
            }
        };
        deliver(&self.in_flight, &self.key, &self.document_id, self.index, result);
    }
}

fn join_in_flight(
    in_flight: &mut Waiters,
    key: &StoreKey,
    reply: CompletionSender,
) -> Result<Dispatch, CompletionSender> {
    match in_flight.get_mut(key) {
        Some(waiters) => {
            debug!(key = %key, waiting = waiters.len() + 1, "Joined in-flight fetch");
            waiters.push(reply);
            Ok(Dispatch::Coalesced)
        }
        None => Err(reply),
    }
}

fn serve_cached(
    reply: CompletionSender,
    key: &StoreKey,
    document_id: &str,
    index: usize,
    text: String,
) -> Dispatch {
    debug!(key = %key, "Chapter served from cache");
    let _ = reply.send(FetchCompletion {
        document_id: document_id.to_string(),
        index,
        result: Ok(ChapterContent {
            document_id: document_id.to_string(),
            index,
            text,
        }),
    });
    Dispatch::CacheHit
}

fn deliver(
    in_flight: &Mutex<Waiters>,
    key: &StoreKey,
    document_id: &str,
    index: usize,
    result: FetchResult,
) {
    let waiters = lock_waiters(in_flight).remove(key).unwrap_or_default();
    debug!(key = %key, waiters = waiters.len(), ok = result.is_ok(), "Delivering chapter fetch");
    for waiter in waiters {
        let _ = waiter.send(FetchCompletion {
            document_id: document_id.to_string(),
            index,
            result: result.clone(),
        });
    }
}

fn lock_waiters(in_flight: &Mutex<Waiters>) -> MutexGuard<'_, Waiters> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parse a `{"data": "<text>"}` chapter body.
pub fn parse_content_body(body: &str) -> Result<String, LoadError> {
    serde_json::from_str::<Envelope<String>>(body)
        .map(|envelope| envelope.data)
        .map_err(|err| LoadError::malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{GatedTransport, ScriptedTransport};
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn coordinator(store: Arc<MemoryStore>, transport: Arc<dyn Transport>) -> FetchCoordinator {
        FetchCoordinator::new(store, transport, CancellationToken::new())
    }

    fn wait_idle(coordinator: &FetchCoordinator) {
        let deadline = Instant::now() + WAIT;
        while coordinator.in_flight_count() > 0 {
            assert!(Instant::now() < deadline, "fetch never settled");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn cached_chapter_never_reaches_network() {
        let store = Arc::new(MemoryStore::new().with_entry(StoreKey::chapter("book", 1), "one"));
        let transport = Arc::new(ScriptedTransport::new().with_content(1, "remote"));
        let coordinator = coordinator(Arc::clone(&store), transport.clone());
        let (tx, rx) = mpsc::channel();

        let dispatch = coordinator.fetch_chapter("book", 1, "src", tx);

        assert_eq!(dispatch, Dispatch::CacheHit);
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.result.unwrap().text, "one");
        assert!(transport.content_calls().is_empty());
    }

    #[test]
    fn network_result_is_persisted_before_delivery() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new().with_content(2, "two"));
        let coordinator = coordinator(Arc::clone(&store), transport.clone());
        let (tx, rx) = mpsc::channel();

        assert_eq!(coordinator.fetch_chapter("book", 2, "src", tx.clone()), Dispatch::Started);
        let completion = rx.recv_timeout(WAIT).unwrap();

        assert_eq!(completion.index, 2);
        assert_eq!(completion.result.unwrap().text, "two");
        assert_eq!(
            store.read(&StoreKey::chapter("book", 2)).unwrap().unwrap(),
            b"two"
        );

        wait_idle(&coordinator);
        assert_eq!(coordinator.fetch_chapter("book", 2, "src", tx), Dispatch::CacheHit);
        assert_eq!(transport.content_calls(), vec![2]);
    }

    #[test]
    fn concurrent_requests_for_same_chapter_share_one_call() {
        let store = Arc::new(MemoryStore::new());
        let (transport, gate) = GatedTransport::new();
        let transport = Arc::new(transport);
        let coordinator = coordinator(Arc::clone(&store), transport.clone());
        let (first_tx, first_rx) = mpsc::channel();
        let (second_tx, second_rx) = mpsc::channel();

        assert_eq!(coordinator.fetch_chapter("book", 0, "src", first_tx), Dispatch::Started);
        assert_eq!(gate.wait_started(), 0);
        assert_eq!(
            coordinator.fetch_chapter("book", 0, "src", second_tx),
            Dispatch::Coalesced
        );
        assert_eq!(coordinator.in_flight_count(), 1);

        gate.release_one();
        let first = first_rx.recv_timeout(WAIT).unwrap();
        let second = second_rx.recv_timeout(WAIT).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.result.unwrap().text, "gated 0");
        assert_eq!(transport.calls(), 1);
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn different_chapters_fetch_independently() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_content(0, "zero")
                .with_content(1, "one"),
        );
        let coordinator = coordinator(Arc::clone(&store), transport.clone());
        let (tx, rx) = mpsc::channel();

        assert_eq!(coordinator.fetch_chapter("book", 0, "src", tx.clone()), Dispatch::Started);
        assert_eq!(coordinator.fetch_chapter("book", 1, "src", tx), Dispatch::Started);

        let mut texts: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(WAIT).unwrap().result.unwrap().text)
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["one".to_string(), "zero".to_string()]);
        let mut calls = transport.content_calls();
        calls.sort();
        assert_eq!(calls, vec![0, 1]);
    }

    #[test]
    fn failures_are_not_persisted_and_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_failure(3)
                .with_raw_body(3, r#"{"data": 42}"#)
                .with_content(3, "three"),
        );
        let coordinator = coordinator(Arc::clone(&store), transport.clone());
        let (tx, rx) = mpsc::channel();

        coordinator.fetch_chapter("book", 3, "src", tx.clone());
        let network = rx.recv_timeout(WAIT).unwrap().result.unwrap_err();
        assert!(matches!(network, LoadError::ContentUnavailable { index: 3, .. }));
        assert!(store.is_empty());
        wait_idle(&coordinator);
        assert_eq!(transport.content_calls(), vec![3]);

        coordinator.fetch_chapter("book", 3, "src", tx.clone());
        let malformed = rx.recv_timeout(WAIT).unwrap().result.unwrap_err();
        assert_eq!(malformed.chapter_index(), Some(3));
        assert!(malformed.to_string().contains("malformed"));
        assert!(store.is_empty());
        wait_idle(&coordinator);

        coordinator.fetch_chapter("book", 3, "src", tx);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().result.unwrap().text, "three");
        assert_eq!(transport.content_calls(), vec![3, 3, 3]);
    }

    #[test]
    fn shutdown_discards_in_flight_results() {
        let store = Arc::new(MemoryStore::new());
        let (transport, gate) = GatedTransport::new();
        let coordinator = coordinator(Arc::clone(&store), Arc::new(transport));
        let (tx, rx) = mpsc::channel();

        coordinator.fetch_chapter("book", 1, "src", tx.clone());
        gate.wait_started();
        coordinator.shutdown();
        gate.release_one();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        wait_idle(&coordinator);
        assert!(store.is_empty());
        assert_eq!(
            coordinator.fetch_chapter("book", 1, "src", tx),
            Dispatch::Cancelled
        );
    }

    /// Reads of one key block until the test lets them through.
    struct StallingStore {
        inner: MemoryStore,
        stalled: StoreKey,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ContentStore for StallingStore {
        fn exists(&self, key: &StoreKey) -> bool {
            self.inner.exists(key)
        }

        fn read(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
            if *key == self.stalled {
                let _ = self.entered.lock().unwrap().send(());
                let _ = self.release.lock().unwrap().recv_timeout(WAIT);
            }
            self.inner.read(key)
        }

        fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<()> {
            self.inner.write(key, bytes)
        }
    }

    /// Misses on the first read, as if a worker persisted right after it.
    struct LateStore {
        reads: AtomicUsize,
    }

    impl ContentStore for LateStore {
        fn exists(&self, _key: &StoreKey) -> bool {
            self.reads.load(Ordering::SeqCst) > 0
        }

        fn read(&self, _key: &StoreKey) -> Result<Option<Vec<u8>>> {
            let seen = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok((seen > 0).then(|| b"late".to_vec()))
        }

        fn write(&self, _key: &StoreKey, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn slow_cache_read_does_not_hold_up_other_chapters() {
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        let store = Arc::new(StallingStore {
            inner: MemoryStore::new(),
            stalled: StoreKey::chapter("book", 5),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let transport = Arc::new(ScriptedTransport::new().with_content(6, "six"));
        let coordinator = FetchCoordinator::new(store, transport, CancellationToken::new());
        let (tx, rx) = mpsc::channel();

        let stalled = {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            thread::spawn(move || coordinator.fetch_chapter("book", 5, "src", tx))
        };
        entered.recv_timeout(WAIT).unwrap();

        let (done_tx, done) = mpsc::channel();
        {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                let _ = done_tx.send(coordinator.fetch_chapter("book", 6, "src", tx));
            });
        }
        assert_eq!(done.recv_timeout(WAIT).unwrap(), Dispatch::Started);
        let completion = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(completion.index, 6);
        assert_eq!(completion.result.unwrap().text, "six");

        release.send(()).unwrap();
        assert_eq!(stalled.join().unwrap(), Dispatch::Started);
    }

    #[test]
    fn chapter_persisted_after_first_read_is_served_from_cache() {
        let store = Arc::new(LateStore {
            reads: AtomicUsize::new(0),
        });
        let transport = Arc::new(ScriptedTransport::new().with_content(4, "remote"));
        let coordinator = FetchCoordinator::new(store, transport.clone(), CancellationToken::new());
        let (tx, rx) = mpsc::channel();

        assert_eq!(coordinator.fetch_chapter("book", 4, "src", tx), Dispatch::CacheHit);
        assert_eq!(rx.try_recv().unwrap().result.unwrap().text, "late");
        assert!(transport.content_calls().is_empty());
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn spawn_failure_is_reported_and_delivered() {
        let coordinator = coordinator(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
        );
        let key = StoreKey::chapter("book", 2);
        let (tx, rx) = mpsc::channel();
        coordinator.waiters().insert(key.clone(), vec![tx]);

        let dispatch = coordinator.worker_dispatch(
            &key,
            "book",
            2,
            Err(io::Error::other("thread limit reached")),
        );

        assert_eq!(dispatch, Dispatch::SpawnFailed);
        let failure = rx.try_recv().unwrap().result.unwrap_err();
        assert!(matches!(failure, LoadError::ContentUnavailable { index: 2, .. }));
        assert!(failure.to_string().contains("thread limit reached"));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn content_body_requires_string_data() {
        assert_eq!(parse_content_body(r#"{"data":"text"}"#).unwrap(), "text");
        assert!(parse_content_body(r#"{"data":null}"#).is_err());
        assert!(parse_content_body(r#"{"text":"x"}"#).is_err());
        assert!(parse_content_body("").is_err());
    }
}
