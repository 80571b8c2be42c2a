//! In-memory stand-ins for the mail API and the decryption capability.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use esindex::api::{ApiError, DetailPayload, ListQuery, MailApi, MessageStub};
use esindex::coordinator::DiskSpace;
use esindex::indexer::{DecryptError, KeyCandidate, MessageDecryptor};

/// A message as stored on the fake server.
#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub stub: MessageStub,
    pub body: Option<String>,
}

/// Mail API backed by an in-memory mailbox.
///
/// Lists newest first and honours `End`/`EndID` the way the server does:
/// only messages strictly older than `(End, EndID)` are returned.
#[derive(Default)]
pub struct FakeMailApi {
    messages: Mutex<Vec<FakeMessage>>,
    queries: Mutex<Vec<ListQuery>>,
    list_calls: AtomicUsize,
    detail_calls: Mutex<HashMap<String, usize>>,
    detail_in_flight: AtomicUsize,
    peak_detail_in_flight: AtomicUsize,
    list_failures: Mutex<VecDeque<ApiError>>,
    detail_failures: Mutex<HashMap<String, VecDeque<ApiError>>>,
    list_delay: Mutex<Option<Duration>>,
    list_stalls: Mutex<VecDeque<Duration>>,
    detail_delay: Mutex<Option<Duration>>,
    detail_delays: Mutex<HashMap<String, Duration>>,
}

impl FakeMailApi {
    pub fn new(messages: Vec<FakeMessage>) -> Self {
        let api = Self::default();
        *api.messages.lock().unwrap() = messages;
        api
    }

    pub fn add_message(&self, message: FakeMessage) {
        self.messages.lock().unwrap().push(message);
    }

    /// Queues errors returned by the next list calls, in order.
    pub fn fail_list(&self, errors: impl IntoIterator<Item = ApiError>) {
        self.list_failures.lock().unwrap().extend(errors);
    }

    /// Queues errors returned by the next detail calls for `id`.
    pub fn fail_detail(&self, id: &str, errors: impl IntoIterator<Item = ApiError>) {
        self.detail_failures
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    /// Makes the next list call alone take `delay`.
    pub fn stall_next_list(&self, delay: Duration) {
        self.list_stalls.lock().unwrap().push_back(delay);
    }

    pub fn set_detail_delay(&self, delay: Duration) {
        *self.detail_delay.lock().unwrap() = Some(delay);
    }

    /// Delay for detail calls of `id`, overriding the global one.
    pub fn set_detail_delay_for(&self, id: &str, delay: Duration) {
        self.detail_delays
            .lock()
            .unwrap()
            .insert(id.to_string(), delay);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<ListQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn detail_calls(&self, id: &str) -> usize {
        self.detail_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_detail_calls(&self) -> usize {
        self.detail_calls.lock().unwrap().values().sum()
    }

    /// Highest number of detail requests seen in flight at once.
    pub fn peak_detail_concurrency(&self) -> usize {
        self.peak_detail_in_flight.load(Ordering::SeqCst)
    }

    fn page(&self, query: &ListQuery) -> Vec<MessageStub> {
        let mut stubs: Vec<MessageStub> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.stub.clone())
            .filter(|s| s.label_ids.iter().any(|l| l == &query.label_id))
            .filter(|s| match (query.end_time, query.end_id.as_deref()) {
                (Some(end), Some(end_id)) => (s.time, s.id.as_str()) < (end, end_id),
                (Some(end), None) => s.time < end,
                (None, _) => true,
            })
            .collect();
        stubs.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| b.id.cmp(&a.id)));
        stubs.truncate(query.page_size as usize);
        stubs
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn list_messages(&self, query: &ListQuery) -> Result<Vec<MessageStub>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        let stall = self.list_stalls.lock().unwrap().pop_front();
        let delay = stall.or(*self.list_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.list_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(self.page(query)),
        }
    }

    async fn message_detail(&self, id: &str) -> Result<DetailPayload, ApiError> {
        *self
            .detail_calls
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default() += 1;

        let now = self.detail_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_detail_in_flight.fetch_max(now, Ordering::SeqCst);
        let own = self.detail_delays.lock().unwrap().get(id).copied();
        let delay = own.or(*self.detail_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.detail_in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .detail_failures
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = failure {
            return Err(error);
        }

        let message = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.stub.id == id)
            .cloned();
        match message {
            Some(message) => Ok(DetailPayload {
                stub: message.stub,
                body: message.body,
                header: Some("Content-Type: text/plain".to_string()),
                mime_type: Some("text/plain".to_string()),
            }),
            None => Err(http_error(422, 2501, "Message does not exist")),
        }
    }

    async fn message_count(&self, label_id: &str) -> Result<u64, ApiError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.stub.label_ids.iter().any(|l| l == label_id))
            .count() as u64)
    }
}

pub fn http_error(status: u16, code: i64, message: &str) -> ApiError {
    ApiError::Http {
        status,
        code,
        message: message.to_string(),
        retry_after: None,
    }
}

pub fn rate_limited(retry_after: Duration) -> ApiError {
    ApiError::Http {
        status: 429,
        code: 2028,
        message: "Too many requests".to_string(),
        retry_after: Some(retry_after),
    }
}

/// "Decrypts" bodies of the form `enc(<key_id>):<plaintext>`.
pub struct FakeDecryptor;

impl MessageDecryptor for FakeDecryptor {
    fn decrypt(&self, ciphertext: &str, key: &KeyCandidate) -> Result<String, DecryptError> {
        let prefix = format!("enc({}):", key.key_id);
        ciphertext
            .strip_prefix(&prefix)
            .map(str::to_string)
            .ok_or_else(|| DecryptError::KeyMismatch {
                key_id: key.key_id.clone(),
            })
    }
}

/// Disk space source reporting whatever the test sets.
pub struct FakeDiskSpace {
    available: AtomicU64,
}

impl FakeDiskSpace {
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
        }
    }

    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

impl Default for FakeDiskSpace {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl DiskSpace for FakeDiskSpace {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.available.load(Ordering::SeqCst))
    }
}
