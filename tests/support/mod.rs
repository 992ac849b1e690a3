//! Shared doubles for the behavior tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use coinwatch_core::{
    Credential, CredentialSource, HttpClient, HttpError, HttpRequest, HttpResponse,
    KeyValueStore, ManualClock, MemoryStore, PriceFetcher, PriceRecord, RateLimitExceeded,
    RateLimiter, StoreEntry, StoreError, Symbol, UpstreamError, UpstreamFailure, UtcDateTime,
};

pub const NOW: &str = "2024-06-01T12:00:00Z";

pub fn sym(value: &str) -> Symbol {
    Symbol::parse(value).expect("valid symbol")
}

pub fn at(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(NOW)))
}

pub fn price(symbol: &str, value: f64, observed_at: UtcDateTime) -> PriceRecord {
    PriceRecord::new(sym(symbol), symbol, value, 1.5, 1_000_000, observed_at).expect("valid record")
}

pub async fn seed(store: &MemoryStore, record: &PriceRecord) {
    store
        .put(StoreEntry::new(
            PriceRecord::store_key(&record.symbol),
            serde_json::to_string(record).expect("serializes"),
        ))
        .await
        .expect("seed price");
}

/// Replays a fixed script of transport outcomes, one per call.
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new(script: Vec<Result<HttpResponse, HttpError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests.lock().expect("lock").push(request);
        let next = self
            .script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(HttpError::new("script exhausted")));
        Box::pin(async move { next })
    }
}

/// Fetcher returning canned records (or a failure) and recording requests.
pub struct StubFetcher {
    outcome: Result<Vec<PriceRecord>, UpstreamFailure>,
    calls: Mutex<Vec<Vec<Symbol>>>,
}

impl StubFetcher {
    pub fn returning(records: Vec<PriceRecord>) -> Self {
        Self {
            outcome: Ok(records),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: Err(UpstreamFailure::Status(503)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<Symbol>> {
        self.calls.lock().expect("lock").clone()
    }
}

impl PriceFetcher for StubFetcher {
    fn fetch<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PriceRecord>, UpstreamError>> + Send + 'a>> {
        self.calls.lock().expect("lock").push(symbols.to_vec());
        let outcome = self.outcome.clone().map_err(|last_failure| UpstreamError {
            attempts: 4,
            last_failure,
            symbols: symbols.to_vec(),
        });
        Box::pin(async move { outcome })
    }
}

/// Store whose every call fails.
#[derive(Default)]
pub struct FailingStore {
    pub calls: AtomicUsize,
}

impl FailingStore {
    fn fail<T: Send + 'static>(&self) -> Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(StoreError::Unavailable(String::from("connection refused"))) })
    }
}

impl KeyValueStore for FailingStore {
    fn get<'a>(
        &'a self,
        _key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>> {
        self.fail()
    }

    fn batch_get<'a>(
        &'a self,
        _keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>
    {
        self.fail()
    }

    fn put<'a>(
        &'a self,
        _entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        self.fail()
    }

    fn batch_put<'a>(
        &'a self,
        _entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        self.fail()
    }
}

/// Store that serves reads from a [`MemoryStore`] but rejects every write.
pub struct ReadOnlyStore(pub MemoryStore);

impl KeyValueStore for ReadOnlyStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>> {
        self.0.get(key)
    }

    fn batch_get<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>
    {
        self.0.batch_get(keys)
    }

    fn put<'a>(
        &'a self,
        _entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async { Err(StoreError::WriteRejected(String::from("read-only"))) })
    }

    fn batch_put<'a>(
        &'a self,
        _entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async { Err(StoreError::WriteRejected(String::from("read-only"))) })
    }
}

/// Store whose reads fail while writes land in a [`MemoryStore`] and are
/// counted. Offers no conditional increment.
pub struct UnreadableStore {
    pub inner: MemoryStore,
    pub writes: AtomicUsize,
}

impl UnreadableStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for UnreadableStore {
    fn get<'a>(
        &'a self,
        _key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoreEntry>, StoreError>> + Send + 'a>> {
        Box::pin(async { Err(StoreError::Unavailable(String::from("read timeout"))) })
    }

    fn batch_get<'a>(
        &'a self,
        _keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<String, StoreEntry>, StoreError>> + Send + 'a>>
    {
        Box::pin(async { Err(StoreError::Unavailable(String::from("read timeout"))) })
    }

    fn put<'a>(
        &'a self,
        entry: StoreEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(entry)
    }

    fn batch_put<'a>(
        &'a self,
        entries: Vec<StoreEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.batch_put(entries)
    }
}

/// Limiter double counting every call.
pub struct CountingLimiter {
    calls: AtomicUsize,
    reject: bool,
}

impl CountingLimiter {
    pub fn admitting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RateLimiter for CountingLimiter {
    fn check_and_increment<'a>(
        &'a self,
        _credential_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RateLimitExceeded>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reject = self.reject;
        Box::pin(async move {
            if reject {
                Err(RateLimitExceeded {
                    retry_after: std::time::Duration::from_secs(60),
                })
            } else {
                Ok(())
            }
        })
    }
}

/// In-memory credential table keyed by token.
#[derive(Default)]
pub struct StaticCredentials {
    by_token: HashMap<String, Credential>,
    fail: bool,
}

impl StaticCredentials {
    pub fn with(mut self, token: &str, enabled: bool) -> Self {
        self.by_token.insert(
            token.to_owned(),
            Credential {
                id: token.to_owned(),
                label: String::from("test"),
                created_at: at(NOW),
                enabled,
            },
        );
        self
    }

    pub fn unavailable() -> Self {
        Self {
            by_token: HashMap::new(),
            fail: true,
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn find<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Credential>, StoreError>> + Send + 'a>> {
        let outcome = if self.fail {
            Err(StoreError::Unavailable(String::from("timeout")))
        } else {
            Ok(self.by_token.get(token).cloned())
        };
        Box::pin(async move { outcome })
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
