use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::cursor::{DEFAULT_PAGE_SIZE, PageCursor};
use super::fetcher::{PageFetcher, monday_start_unix};
use super::merge::merge_page;
use super::store::StoreHandle;

/// Progress notifications emitted to the registered observer, in order:
/// `Started`, then `PagingStarted` once the first page is committed,
/// then exactly one terminal event (`Empty`, `Failed` or `Finished`)
/// per run. Cancellation is not an error; it terminates with
/// `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    PagingStarted,
    Empty,
    Failed(String),
    Finished,
}

/// Loading states of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    InitialLoading,
    PagingLoading,
}

/// Drives full sync runs: reset the cursor, fetch and merge every page,
/// reconcile stale rows, report phase transitions. At most one run is
/// in flight; starting a new one cancels the old cooperatively — the
/// superseded run finishes its in-flight call, observes the token at
/// the next checkpoint and commits nothing past it.
pub struct SyncCoordinator {
    inner: Arc<Inner>,
    current: Mutex<Option<CancellationToken>>,
}

struct Inner {
    fetcher: PageFetcher,
    store: StoreHandle,
    page_size: u32,
    observer: Mutex<Option<mpsc::UnboundedSender<SyncEvent>>>,
    phase: Mutex<SyncPhase>,
}

impl SyncCoordinator {
    pub fn new(fetcher: PageFetcher, store: StoreHandle) -> Self {
        Self::with_page_size(fetcher, store, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(fetcher: PageFetcher, store: StoreHandle, page_size: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                page_size,
                observer: Mutex::new(None),
                phase: Mutex::new(SyncPhase::Idle),
            }),
            current: Mutex::new(None),
        }
    }

    /// Registers the single observer, replacing any previous one, and
    /// returns the receiving end of its event stream.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.observer.lock().expect("observer lock poisoned") = Some(tx);
        rx
    }

    pub fn current_phase(&self) -> SyncPhase {
        *self.inner.phase.lock().expect("phase lock poisoned")
    }

    /// Starts a run over all pages. A run already in flight is cancelled
    /// and superseded; its partial data stays.
    pub fn load_all_pages(&self) {
        let mut current = self.current.lock().expect("run lock poisoned");
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        tokio::spawn(run(Arc::clone(&self.inner), token.clone()));
        *current = Some(token);
    }

    /// Cancels the in-flight run, if any. The run still surfaces its
    /// terminal `Finished` event once it observes the token.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().expect("run lock poisoned").as_ref() {
            token.cancel();
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(token) = self.current.lock().expect("run lock poisoned").take() {
            token.cancel();
        }
    }
}

impl Inner {
    fn emit(&self, event: SyncEvent) {
        if let Some(observer) = self.observer.lock().expect("observer lock poisoned").as_ref() {
            let _ = observer.send(event);
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    fn finish(&self, event: SyncEvent) {
        self.set_phase(SyncPhase::Idle);
        self.emit(event);
    }

    async fn reconcile(&self, seen: &HashSet<i64>) {
        match self.store.delete_items_not_in(seen).await {
            Ok(removed) if !removed.is_empty() => {
                debug!(count = removed.len(), "reconciled stale items");
            }
            Ok(_) => {}
            Err(err) => error!(%err, "failed to reconcile stale items"),
        }
    }
}

async fn run(inner: Arc<Inner>, token: CancellationToken) {
    if token.is_cancelled() {
        return;
    }

    inner.set_phase(SyncPhase::InitialLoading);
    inner.emit(SyncEvent::Started);

    let since = match monday_start_unix(OffsetDateTime::now_utc()) {
        Ok(since) => since,
        Err(err) => {
            error!(%err, "cannot compute the since boundary");
            inner.finish(SyncEvent::Failed(err.to_string()));
            return;
        }
    };

    let mut cursor = PageCursor::new(inner.page_size);
    cursor.reset();
    let mut seen: HashSet<i64> = HashSet::new();

    let first = match inner.fetcher.fetch_page(&mut cursor, since).await {
        Ok(items) => items,
        Err(err) => {
            error!(%err, "first page fetch failed");
            inner.finish(SyncEvent::Failed(err.to_string()));
            return;
        }
    };

    if first.is_empty() {
        // An empty remote inbox legitimately means every local item is
        // stale.
        inner.reconcile(&seen).await;
        inner.finish(SyncEvent::Empty);
        return;
    }

    match merge_page(&inner.store, &first).await {
        Ok(ids) => seen.extend(ids),
        Err(err) => {
            error!(%err, "merging the first page failed");
            inner.finish(SyncEvent::Failed(err.to_string()));
            return;
        }
    }

    if token.is_cancelled() {
        inner.finish(SyncEvent::Finished);
        return;
    }

    inner.set_phase(SyncPhase::PagingLoading);
    inner.emit(SyncEvent::PagingStarted);

    let mut cancelled = false;
    while !cursor.is_paging_finished() {
        if token.is_cancelled() {
            cancelled = true;
            break;
        }
        let items = match inner.fetcher.fetch_page(&mut cursor, since).await {
            Ok(items) => items,
            Err(err) => {
                error!(%err, offset = cursor.offset(), "page fetch failed");
                inner.finish(SyncEvent::Failed(err.to_string()));
                return;
            }
        };
        if token.is_cancelled() {
            // The fetched page is dropped whole; no partial writes.
            cancelled = true;
            break;
        }
        match merge_page(&inner.store, &items).await {
            Ok(ids) => seen.extend(ids),
            Err(err) => {
                error!(%err, "page merge failed");
                inner.finish(SyncEvent::Failed(err.to_string()));
                return;
            }
        }
    }

    if !cancelled {
        // An interrupted run must not delete entities it never got to
        // see.
        inner.reconcile(&seen).await;
    }
    inner.finish(SyncEvent::Finished);
}
