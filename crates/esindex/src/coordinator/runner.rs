//! The indexing coordinator: run state machine, paging loop and
//! host-facing controls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::api::{ApiError, MailApi, MessageStub};
use crate::fetch::{PagedFetchOperation, DEFAULT_PAGE_SIZE};
use crate::indexer::{DecryptAndIndexStage, KeyRing, MessageDecryptor};
use crate::operation::{Completion, OperationQueue, QueuedOperation};
use crate::sanitize::hash_id;
use crate::store::{IndexStore, WatermarkStore};

use super::error::{IndexingError, Result};
use super::progress::{IndexingProgress, ProgressBroadcaster};
use super::retry::BackoffPolicy;
use super::state::{IndexingState, PauseReason, PauseReasons};
use super::storage::{self, DiskSpace, DEFAULT_LOW_STORAGE_BYTES, STORAGE_HEADROOM};
use super::task::{InFlight, InFlightGuard, IndexMessageTask, MessageOutcome, PageTally, Pipeline};
use super::watermark::IndexWatermark;

/// Label that holds every message.
pub const ALL_MAIL_LABEL: &str = "5";

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_INDEX_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables of an indexing run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub label_id: String,
    pub page_size: u32,
    /// Concurrent message tasks at full speed.
    pub max_concurrent: usize,
    /// Concurrent message tasks at reduced speed.
    pub reduced_concurrent: usize,
    pub page_retry: BackoffPolicy,
    pub message_retry: BackoffPolicy,
    pub mode: IndexMode,
    /// Bytes of indexed content allowed. `None` means unlimited.
    pub storage_limit: Option<u64>,
    /// Free disk space below which indexing stops.
    pub low_storage_bytes: u64,
    /// A page download running longer is cancelled and retried.
    pub page_timeout: Duration,
    /// Messages of a page still running after this are cancelled and
    /// counted as failed.
    pub index_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            label_id: ALL_MAIL_LABEL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent: 8,
            reduced_concurrent: 2,
            page_retry: BackoffPolicy::pages(),
            message_retry: BackoffPolicy::messages(),
            mode: IndexMode::Content,
            storage_limit: None,
            low_storage_bytes: DEFAULT_LOW_STORAGE_BYTES,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            index_timeout: DEFAULT_INDEX_TIMEOUT,
        }
    }
}

impl CoordinatorSettings {
    /// Per-page message concurrency at `speed`.
    pub fn concurrency(&self, speed: IndexingSpeed) -> usize {
        match speed {
            IndexingSpeed::Full => self.max_concurrent,
            IndexingSpeed::Reduced => self.reduced_concurrent,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingSpeed {
    #[default]
    Full,
    /// Fewer concurrent tasks, e.g. on battery or a metered network.
    Reduced,
}

/// What gets indexed per message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Download, decrypt and index bodies along with metadata.
    #[default]
    Content,
    /// Index listing metadata only; no detail requests.
    MetadataOnly,
}

/// Collaborators a coordinator is built from.
pub struct CoordinatorParts {
    pub user_id: String,
    pub api: Arc<dyn MailApi>,
    pub decryptor: Arc<dyn MessageDecryptor>,
    pub keys: Arc<KeyRing>,
    pub index_store: Arc<dyn IndexStore>,
    pub watermark_store: Arc<dyn WatermarkStore>,
    /// Without one the free space check is skipped.
    pub disk_space: Option<Arc<dyn DiskSpace>>,
}

/// Drives indexing of one user's mailbox.
///
/// Cloning yields another handle to the same coordinator. The run itself
/// happens on a spawned task, so every control method returns immediately.
#[derive(Clone)]
pub struct IndexingCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: CoordinatorSettings,
    pipeline: Arc<Pipeline>,
    watermark_store: Arc<dyn WatermarkStore>,
    disk_space: Option<Arc<dyn DiskSpace>>,
    state: watch::Sender<IndexingState>,
    /// True while a run task exists.
    active: watch::Sender<bool>,
    control: Mutex<Control>,
    pause_notify: Notify,
    progress: Mutex<IndexingProgress>,
    broadcaster: ProgressBroadcaster,
    /// Single-message tasks started outside the paging loop.
    maintenance: Mutex<Arc<OperationQueue>>,
    root: CancellationToken,
}

struct Control {
    reasons: PauseReasons,
    speed: IndexingSpeed,
    storage_limit: Option<u64>,
    run_token: CancellationToken,
    /// Pauses not yet written to the watermark.
    pending_pauses: u32,
    pending_interruptions: u32,
}

enum RunExit {
    Completed,
    Paused,
    Cancelled,
    StorageLimit,
    LowStorage,
}

enum PageFetch {
    Page(Vec<MessageStub>),
    /// Woken during backoff; the loop re-checks pause and cancel.
    Interrupted,
    Cancelled,
}

impl IndexingCoordinator {
    pub fn new(parts: CoordinatorParts, settings: CoordinatorSettings) -> Self {
        let CoordinatorParts {
            user_id,
            api,
            decryptor,
            keys,
            index_store,
            watermark_store,
            disk_space,
        } = parts;

        let root = CancellationToken::new();
        let pipeline = Arc::new(Pipeline {
            user_id: user_id.clone(),
            api,
            stage: DecryptAndIndexStage::new(decryptor, keys, index_store.clone()),
            index_store,
            message_retry: settings.message_retry,
            mode: settings.mode,
            in_flight: InFlight::default(),
        });
        let maintenance = maintenance_queue(&settings, &root);

        let (state, _) = watch::channel(IndexingState::Idle);
        let (active, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                pipeline,
                watermark_store,
                disk_space,
                state,
                active,
                control: Mutex::new(Control {
                    reasons: PauseReasons::default(),
                    speed: IndexingSpeed::Full,
                    storage_limit: settings.storage_limit,
                    run_token: root.child_token(),
                    pending_pauses: 0,
                    pending_interruptions: 0,
                }),
                pause_notify: Notify::new(),
                progress: Mutex::new(IndexingProgress::new(user_id)),
                broadcaster: ProgressBroadcaster::default(),
                maintenance: Mutex::new(maintenance),
                settings,
                root,
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.pipeline.user_id
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> IndexingState {
        *self.inner.state.borrow()
    }

    pub fn progress(&self) -> IndexingProgress {
        self.inner.progress_guard().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexingProgress> {
        self.inner.broadcaster.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<IndexingState> {
        self.inner.state.subscribe()
    }

    /// Number of messages that currently have a task.
    pub fn in_flight(&self) -> usize {
        self.inner.pipeline.in_flight.len()
    }

    /// Starts or restarts the run from the persisted watermark.
    ///
    /// Goes to `Paused` instead if pause reasons are pending. Calling it
    /// while running, paused or completed is a no-op.
    pub fn start(&self) -> Result<IndexingState> {
        let inner = &self.inner;
        let mut control = inner.control();
        let current = self.state();
        match current {
            IndexingState::Running | IndexingState::Paused | IndexingState::Completed => {
                return Ok(current)
            }
            IndexingState::Cancelled => {
                return Err(IndexingError::InvalidTransition {
                    from: current,
                    to: IndexingState::Running,
                })
            }
            IndexingState::Idle
            | IndexingState::Failed
            | IndexingState::Partial
            | IndexingState::LowStorage => {}
        }

        inner.update_progress(|p| p.last_error = None);
        if !control.reasons.is_empty() {
            inner.transition(IndexingState::Paused);
            return Ok(IndexingState::Paused);
        }

        inner.transition(IndexingState::Running);
        inner.spawn_run(&mut control);
        Ok(IndexingState::Running)
    }

    /// Adds a pause reason. In-flight messages finish; no new page starts.
    pub fn pause(&self, reason: PauseReason) {
        let inner = &self.inner;
        let mut control = inner.control();
        if !control.reasons.insert(reason) {
            return;
        }

        // Reasons added while idle only gate the next start.
        if self.state() == IndexingState::Running && inner.transition(IndexingState::Paused) {
            if reason.is_interruption() {
                control.pending_interruptions += 1;
            } else {
                control.pending_pauses += 1;
            }
            info!(user = %hash_id(self.user_id()), ?reason, "Indexing paused");
        }
        let reasons = control.reasons.to_vec();
        inner.update_progress(|p| p.pause_reasons = reasons);
        inner.pause_notify.notify_waiters();
    }

    /// Clears a pause reason and resumes once none remain.
    pub fn resume(&self, reason: PauseReason) {
        let inner = &self.inner;
        let mut control = inner.control();
        control.reasons.remove(reason);
        let reasons = control.reasons.to_vec();
        inner.update_progress(|p| p.pause_reasons = reasons);

        if !control.reasons.is_empty() || self.state() != IndexingState::Paused {
            return;
        }

        inner.transition(IndexingState::Running);
        info!(user = %hash_id(self.user_id()), ?reason, "Indexing resumed");
        // A run that has not yet parked simply keeps going.
        inner.spawn_run(&mut control);
    }

    /// Cancels the run and any single-message tasks. Queued and in-flight
    /// messages finish as cancelled and the current page is not committed.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let control = inner.control();
        inner.transition(IndexingState::Cancelled);
        control.run_token.cancel();
        inner.maintenance().cancel_all();
        drop(control);
        inner.pause_notify.notify_waiters();
    }

    /// Changes the storage limit; `None` lifts it.
    ///
    /// A running index applies the new limit at its next page boundary.
    /// Otherwise an index above the limit loses its oldest records right
    /// away and a completed one becomes `Partial`, while a partial index
    /// with room again resumes.
    pub async fn set_storage_limit(&self, limit: Option<u64>) -> Result<IndexingState> {
        let inner = &self.inner;
        let running = {
            let mut control = inner.control();
            control.storage_limit = limit;
            *inner.active.borrow()
        };
        info!(user = %hash_id(self.user_id()), limit_bytes = ?limit, "Storage limit changed");
        if running {
            return Ok(self.state());
        }

        let size = inner.index_size().await?;
        match limit {
            Some(limit) if size > limit => {
                let mut wm = inner.load_watermark().await?;
                inner.shrink_index(&mut wm, limit).await?;
                inner.save_watermark(&mut wm).await?;
                if self.state() == IndexingState::Completed {
                    inner.transition(IndexingState::Partial);
                }
                Ok(self.state())
            }
            _ if self.state() == IndexingState::Partial
                && !storage::exceeds_limit(size, limit) =>
            {
                self.start()
            }
            _ => Ok(self.state()),
        }
    }

    /// Applies from the next page on.
    pub fn set_speed(&self, speed: IndexingSpeed) {
        let mut control = self.inner.control();
        if control.speed != speed {
            info!(user = %hash_id(self.user_id()), ?speed, "Indexing speed changed");
            control.speed = speed;
        }
    }

    /// Resolves once no run task exists.
    pub async fn wait_until_stopped(&self) -> IndexingState {
        let mut rx = self.inner.active.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = rx.wait_for(|active| !*active).await;
        self.state()
    }

    /// Deletes the index and the watermark, then starts from scratch.
    pub async fn rebuild(&self) -> Result<IndexingState> {
        info!(user = %hash_id(self.user_id()), "Rebuilding search index");
        self.stop_and_clear().await?;
        self.start()
    }

    /// Stops indexing and deletes the index and watermark, leaving the
    /// coordinator `Idle`.
    pub async fn delete_search_index(&self) -> Result<()> {
        info!(user = %hash_id(self.user_id()), "Deleting search index");
        self.stop_and_clear().await
    }

    /// Drops a message from the index, e.g. after it was deleted remotely.
    pub async fn remove_message(&self, message_id: &str) -> Result<bool> {
        let store = self.inner.pipeline.index_store.clone();
        let id = message_id.to_string();
        let removed = self
            .inner
            .blocking(move || store.remove(&id).map_err(IndexingError::from))
            .await?;
        debug!(message = %hash_id(message_id), removed, "Message removed from index");
        Ok(removed)
    }

    /// Indexes a single message outside the paging loop, e.g. a new arrival.
    ///
    /// `cancel`, `rebuild` and `delete_search_index` cancel these tasks
    /// too; after `cancel` new ones are refused as cancelled.
    pub async fn index_message(&self, stub: MessageStub) -> Completion<MessageOutcome> {
        let inner = &self.inner;
        let submitted = {
            let _control = inner.control();
            if self.state() == IndexingState::Cancelled {
                return Completion::Cancelled;
            }
            let Some(guard) = InFlightGuard::claim(&inner.pipeline, &stub.id) else {
                return Completion::Finished(MessageOutcome::Skipped);
            };
            let task = IndexMessageTask::new(inner.pipeline.clone(), stub, guard);
            inner.maintenance().submit(task)
        };
        submitted.wait().await
    }

    async fn stop_and_clear(&self) -> Result<()> {
        let inner = &self.inner;
        let maintenance = {
            let control = inner.control();
            inner.transition(IndexingState::Cancelled);
            control.run_token.cancel();
            let maintenance = inner.maintenance().clone();
            maintenance.cancel_all();
            maintenance
        };
        inner.pause_notify.notify_waiters();
        self.wait_until_stopped().await;
        // No task may write after the clear.
        maintenance.wait_until_all_finished().await;

        let index_store = inner.pipeline.index_store.clone();
        inner
            .blocking(move || index_store.clear().map_err(IndexingError::from))
            .await?;
        let watermark_store = inner.watermark_store.clone();
        let user_id = self.user_id().to_string();
        inner
            .blocking(move || {
                watermark_store
                    .delete(&user_id)
                    .map_err(IndexingError::from)
            })
            .await?;

        let mut control = inner.control();
        control.run_token = inner.root.child_token();
        *inner.maintenance() = maintenance_queue(&inner.settings, &inner.root);
        control.pending_pauses = 0;
        control.pending_interruptions = 0;
        inner.state.send_replace(IndexingState::Idle);
        let reasons = control.reasons.to_vec();
        inner.update_progress(|p| {
            *p = IndexingProgress::new(p.user_id.clone());
            p.pause_reasons = reasons;
        });
        Ok(())
    }
}

fn maintenance_queue(
    settings: &CoordinatorSettings,
    root: &CancellationToken,
) -> Arc<OperationQueue> {
    Arc::new(OperationQueue::with_parent(
        "index-maintenance",
        settings.max_concurrent,
        root,
    ))
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maintenance(&self) -> MutexGuard<'_, Arc<OperationQueue>> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress_guard(&self) -> MutexGuard<'_, IndexingProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a state change if allowed and publishes it.
    fn transition(&self, next: IndexingState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            let user = hash_id(&self.pipeline.user_id);
            debug!(user = %user, state = %next, "Indexing state changed");
            self.update_progress(|p| p.state = next);
        }
        changed
    }

    fn update_progress(&self, f: impl FnOnce(&mut IndexingProgress)) {
        let snapshot = {
            let mut progress = self.progress_guard();
            f(&mut progress);
            progress.updated_at = Utc::now();
            progress.clone()
        };
        self.broadcaster.send(snapshot);
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| IndexingError::Task(e.to_string()))?
    }

    fn pause_requested(&self) -> bool {
        !self.control().reasons.is_empty()
    }

    fn concurrency(&self) -> usize {
        let speed = self.control().speed;
        self.settings.concurrency(speed)
    }

    /// Spawns a run task unless one is still alive. Caller holds `control`.
    fn spawn_run(self: &Arc<Self>, control: &mut Control) {
        if *self.active.borrow() {
            return;
        }
        if control.run_token.is_cancelled() {
            control.run_token = self.root.child_token();
        }
        self.active.send_replace(true);

        let inner = self.clone();
        let token = control.run_token.clone();
        tokio::spawn(async move { inner.run(token).await });
    }

    /// Marks the run task parked if pause reasons are still pending.
    fn try_park(&self) -> bool {
        let control = self.control();
        if control.reasons.is_empty() {
            return false;
        }
        self.active.send_replace(false);
        true
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let span = info_span!("index.run", user = %hash_id(&self.pipeline.user_id));
        let exit = self.run_pages(&cancel).instrument(span).await;

        let user = hash_id(&self.pipeline.user_id);
        let _control = self.control();
        match exit {
            // Already parked; a resume may have spawned a new run since.
            Ok(RunExit::Paused) => return,
            Ok(RunExit::Completed) => {
                info!(user = %user, "Indexing completed");
                self.transition(IndexingState::Completed);
            }
            Ok(RunExit::Cancelled) => {
                info!(user = %user, "Indexing cancelled");
            }
            Ok(RunExit::StorageLimit) => {
                warn!(user = %user, "Storage limit reached, index is partial");
                self.transition(IndexingState::Partial);
            }
            Ok(RunExit::LowStorage) => {
                warn!(user = %user, "Device storage low, indexing stopped");
                self.transition(IndexingState::LowStorage);
            }
            Err(e) => {
                error!(user = %user, error = %e, "Indexing failed");
                let message = e.to_string();
                self.update_progress(|p| p.last_error = Some(message));
                self.transition(IndexingState::Failed);
            }
        }
        self.active.send_replace(false);
    }

    async fn run_pages(self: &Arc<Self>, cancel: &CancellationToken) -> Result<RunExit> {
        let mut wm = self.load_watermark().await?;
        if wm.is_complete {
            self.update_progress(|p| {
                p.apply_watermark(&wm);
                p.apply_estimate(wm.processed_count, Duration::ZERO);
            });
            return Ok(RunExit::Completed);
        }
        debug!(last_indexed_time = wm.last_indexed_time, "Starting from watermark");

        if let Some(total) = self.fetch_total(cancel).await {
            wm.total_messages = Some(total);
        }
        self.save_watermark(&mut wm).await?;

        let started = Instant::now();
        let processed_at_start = wm.processed_count;
        loop {
            if cancel.is_cancelled() {
                return Ok(RunExit::Cancelled);
            }
            if self.pause_requested() {
                self.save_watermark(&mut wm).await?;
                if self.try_park() {
                    return Ok(RunExit::Paused);
                }
            }
            if let Some(exit) = self.storage_exit(&mut wm).await? {
                return Ok(exit);
            }

            let stubs = match self.fetch_page(&wm, cancel).await? {
                PageFetch::Page(stubs) => stubs,
                PageFetch::Interrupted => continue,
                PageFetch::Cancelled => return Ok(RunExit::Cancelled),
            };

            if stubs.is_empty() {
                wm.mark_complete(Utc::now());
                self.save_watermark(&mut wm).await?;
                self.update_progress(|p| p.apply_estimate(processed_at_start, started.elapsed()));
                return Ok(RunExit::Completed);
            }

            let Some(tally) = self.process_page(&stubs, cancel).await else {
                return Ok(RunExit::Cancelled);
            };

            let end_of_stream = stubs.len() < self.settings.page_size as usize;
            wm.commit_page(&stubs, tally.processed, tally.failed, Utc::now());
            if end_of_stream {
                wm.mark_complete(Utc::now());
            }
            self.save_watermark(&mut wm).await?;
            self.update_progress(|p| {
                p.pages_committed += 1;
                p.apply_estimate(processed_at_start, started.elapsed());
            });
            info!(
                messages = stubs.len(),
                processed = tally.processed,
                failed = tally.failed,
                last_indexed_time = wm.last_indexed_time,
                "Page committed"
            );

            if end_of_stream {
                return Ok(RunExit::Completed);
            }
        }
    }

    async fn load_watermark(&self) -> Result<IndexWatermark> {
        let store = self.watermark_store.clone();
        let user_id = self.pipeline.user_id.clone();
        let loaded = self
            .blocking(move || store.load(&user_id).map_err(IndexingError::from))
            .await?;
        Ok(loaded.unwrap_or_else(|| IndexWatermark::new(self.pipeline.user_id.clone(), Utc::now())))
    }

    async fn index_size(&self) -> Result<u64> {
        let store = self.pipeline.index_store.clone();
        self.blocking(move || store.content_size().map_err(IndexingError::from))
            .await
    }

    /// Stops the run before the next page when the device is short on
    /// space or the index reached its limit. An index already above the
    /// limit is shrunk first.
    async fn storage_exit(&self, wm: &mut IndexWatermark) -> Result<Option<RunExit>> {
        if let Some(disk) = &self.disk_space {
            let available = disk.available_bytes();
            if storage::is_low(available, self.settings.low_storage_bytes) {
                warn!(
                    available_bytes = ?available,
                    floor_bytes = self.settings.low_storage_bytes,
                    "Free disk space below floor"
                );
                return Ok(Some(RunExit::LowStorage));
            }
        }

        let Some(limit) = self.control().storage_limit else {
            return Ok(None);
        };
        let size = self.index_size().await?;
        if !storage::exceeds_limit(size, Some(limit)) {
            return Ok(None);
        }

        info!(index_bytes = size, limit_bytes = limit, "Index reached storage limit");
        if size > limit {
            self.shrink_index(wm, limit).await?;
            self.save_watermark(wm).await?;
        }
        Ok(Some(RunExit::StorageLimit))
    }

    /// Drops the oldest records until the index fits below `limit` and
    /// moves the cursor to the oldest record kept, so a later run resumes
    /// there.
    async fn shrink_index(&self, wm: &mut IndexWatermark, limit: u64) -> Result<()> {
        let target = limit.saturating_sub(STORAGE_HEADROOM);
        let store = self.pipeline.index_store.clone();
        let (dropped, oldest) = self
            .blocking(move || {
                let dropped = store.shrink(target)?;
                Ok((dropped, store.oldest()?))
            })
            .await?;

        match oldest {
            Some((time, message_id)) => {
                wm.last_indexed_time = time;
                wm.last_indexed_message_id = Some(message_id);
            }
            None => {
                wm.last_indexed_time = wm.started_at.timestamp();
                wm.last_indexed_message_id = None;
            }
        }
        wm.processed_count = wm.processed_count.saturating_sub(dropped as u64);
        wm.is_complete = false;
        info!(dropped, target_bytes = target, "Index shrunk");
        Ok(())
    }

    /// Best-effort total for progress reporting.
    async fn fetch_total(&self, cancel: &CancellationToken) -> Option<u64> {
        let label = &self.settings.label_id;
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = self.pipeline.api.message_count(label) => result,
        };
        match result {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(error = %e, "Could not fetch message count");
                None
            }
        }
    }

    async fn fetch_page(
        &self,
        wm: &IndexWatermark,
        cancel: &CancellationToken,
    ) -> Result<PageFetch> {
        let policy = self.settings.page_retry;
        let mut attempt = 0;
        loop {
            let operation = PagedFetchOperation::new(
                self.pipeline.api.clone(),
                self.pipeline.user_id.clone(),
                self.settings.label_id.clone(),
                Some(wm.last_indexed_time),
                wm.last_indexed_message_id.clone(),
                self.settings.page_size,
            );
            let queue = OperationQueue::with_parent("page-fetch", 1, cancel);
            let waited = tokio::time::timeout(
                self.settings.page_timeout,
                queue.submit(operation).wait(),
            )
            .await;
            let completion = match waited {
                Ok(completion) => completion,
                Err(_) => {
                    queue.cancel_all();
                    queue.wait_until_all_finished().await;
                    let secs = self.settings.page_timeout.as_secs();
                    Completion::Finished(Err(ApiError::Timeout(format!(
                        "page download exceeded {secs}s"
                    ))))
                }
            };
            let error = match completion {
                Completion::Cancelled => return Ok(PageFetch::Cancelled),
                Completion::Finished(Ok(stubs)) => return Ok(PageFetch::Page(stubs)),
                Completion::Finished(Err(error)) => error,
            };

            attempt += 1;
            if !error.is_retryable() || !policy.should_retry(attempt) {
                return Err(IndexingError::PageFetch {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = policy.delay(attempt, error.retry_after());
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Page fetch failed, retrying"
            );
            if !self.backoff(delay, cancel).await {
                return Ok(if cancel.is_cancelled() {
                    PageFetch::Cancelled
                } else {
                    PageFetch::Interrupted
                });
            }
        }
    }

    /// Sleeps for `delay`. Returns false if woken early by a pause or cancel.
    async fn backoff(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        let notified = self.pause_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.pause_requested() {
            return false;
        }

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = &mut notified => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Runs every message of a page and waits for all of them.
    ///
    /// Returns `None` if the run was cancelled, in which case the page must
    /// not be committed.
    async fn process_page(
        &self,
        stubs: &[MessageStub],
        cancel: &CancellationToken,
    ) -> Option<PageTally> {
        let concurrency = self.concurrency();
        let queue = OperationQueue::with_parent("index-messages", concurrency, cancel);
        let span = info_span!("index.page", messages = stubs.len(), concurrency);

        async {
            let mut submitted = Vec::with_capacity(stubs.len());
            for stub in stubs {
                let Some(guard) = InFlightGuard::claim(&self.pipeline, &stub.id) else {
                    debug!(message = %hash_id(&stub.id), "Message already in flight");
                    continue;
                };
                submitted.push(queue.submit(IndexMessageTask::new(
                    self.pipeline.clone(),
                    stub.clone(),
                    guard,
                )));
            }

            let waits = join_all(submitted.into_iter().map(QueuedOperation::wait));
            tokio::pin!(waits);
            let completions = tokio::select! {
                completions = &mut waits => completions,
                _ = tokio::time::sleep(self.settings.index_timeout) => {
                    warn!(
                        timeout_secs = self.settings.index_timeout.as_secs(),
                        "Page indexing timed out, cancelling remaining messages"
                    );
                    queue.cancel_all();
                    waits.await
                }
            };
            queue.wait_until_all_finished().await;
            if cancel.is_cancelled() {
                return None;
            }

            let mut tally = PageTally::default();
            for completion in completions {
                let outcome = match completion {
                    Completion::Finished(outcome) => outcome,
                    Completion::Cancelled => MessageOutcome::TimedOut,
                };
                if outcome.is_failure() {
                    debug!(?outcome, "Message not indexed");
                }
                tally.record(&outcome);
            }
            Some(tally)
        }
        .instrument(span)
        .await
    }

    /// Folds pending pause counters into `wm`, persists it and publishes
    /// the new progress.
    async fn save_watermark(&self, wm: &mut IndexWatermark) -> Result<()> {
        {
            let mut control = self.control();
            wm.number_of_pauses += std::mem::take(&mut control.pending_pauses);
            wm.number_of_interruptions += std::mem::take(&mut control.pending_interruptions);
        }
        wm.updated_at = Utc::now();

        let store = self.watermark_store.clone();
        let snapshot = wm.clone();
        self.blocking(move || store.save(&snapshot).map_err(IndexingError::from))
            .await?;
        self.update_progress(|p| p.apply_watermark(wm));
        Ok(())
    }
}
