//! Purpose: Catalog controller: pending form fields, displayed lists, writes, and refresh.
//! Exports: `Catalog`, `CatalogSettings`, `CatalogSnapshot`, `RefreshMode`, `RefreshOutcome`,
//!          `Submission`, `EventWatcher`.
//! Role: Owns the ledger handle for the view; every remote call runs on the blocking pool.
//! Invariants: Displayed lists are replaced wholesale, only by the most recently issued refresh.
//! Invariants: A failed write schedules nothing and leaves the displayed lists untouched.
//! Invariants: The settle delay is a timer, not a confirmation that the write landed.
#![allow(clippy::result_large_err)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::provider::{Session, no_account_error};
use crate::core::abi::Address;
use crate::core::error::{Error, ErrorKind};
use crate::core::ledger::{Ledger, LedgerResult, TxHash};
use crate::core::reconcile::{Partition, reconcile};
use crate::core::record::{Book, parse_uid};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// How the catalog learns that a write has landed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshMode {
    /// Re-read after a fixed settle delay.
    Delay,
    /// Re-read when the ledger reports a borrow/return notification.
    Events,
}

#[derive(Clone, Debug)]
pub struct CatalogSettings {
    pub settle_delay: Duration,
    pub refresh: RefreshMode,
    pub poll_interval: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            refresh: RefreshMode::Delay,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    pub account: Option<Address>,
    pub pending_uid: String,
    pub pending_title: String,
    pub available: Vec<Book>,
    pub borrowed: Vec<Book>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshOutcome {
    Committed,
    /// A newer refresh was issued while this one was in flight; its result was dropped.
    Superseded,
}

/// A write the ledger accepted, plus the refresh it scheduled (if any).
pub struct Submission {
    pub tx: TxHash,
    refresh: Option<JoinHandle<()>>,
}

impl Submission {
    pub fn refresh_scheduled(&self) -> bool {
        self.refresh.is_some()
    }

    /// Wait for the scheduled refresh to run; false if its task panicked or was cancelled.
    pub async fn settled(self) -> bool {
        let Some(handle) = self.refresh else {
            return true;
        };
        match handle.await {
            Ok(()) => true,
            Err(err) => {
                warn!(tx = %self.tx.0, error = %err, "scheduled refresh did not complete");
                false
            }
        }
    }
}

#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    ledger: Arc<dyn Ledger>,
    account: Option<Address>,
    settings: CatalogSettings,
    view: Mutex<ViewState>,
    issued: AtomicU64,
}

#[derive(Default)]
struct ViewState {
    pending_uid: String,
    pending_title: String,
    partition: Partition,
}

impl Catalog {
    pub fn new(session: &Session, settings: CatalogSettings) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                ledger: session.ledger(),
                account: session.account(),
                settings,
                view: Mutex::new(ViewState::default()),
                issued: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.inner.settings
    }

    pub fn account(&self) -> Option<Address> {
        self.inner.account
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let view = self.lock_view();
        CatalogSnapshot {
            account: self.inner.account,
            pending_uid: view.pending_uid.clone(),
            pending_title: view.pending_title.clone(),
            available: view.partition.available.clone(),
            borrowed: view.partition.borrowed.clone(),
        }
    }

    pub fn set_pending_uid(&self, text: impl Into<String>) {
        self.lock_view().pending_uid = text.into();
    }

    pub fn set_pending_title(&self, text: impl Into<String>) {
        self.lock_view().pending_title = text.into();
    }

    /// Reconcile against the ledger and commit the result if no newer refresh was issued.
    pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
        let token = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let ledger = Arc::clone(&self.inner.ledger);
        let partition = match run_blocking(move || reconcile(ledger.as_ref())).await {
            Ok(partition) => partition,
            Err(err) => {
                warn!(token, error = %err, "error fetching books");
                return Err(err);
            }
        };

        let mut view = self.lock_view();
        if token != self.inner.issued.load(Ordering::SeqCst) {
            debug!(token, "discarding superseded reconciliation");
            return Ok(RefreshOutcome::Superseded);
        }
        debug!(
            token,
            available = partition.available.len(),
            borrowed = partition.borrowed.len(),
            "committing reconciliation"
        );
        view.partition = partition;
        Ok(RefreshOutcome::Committed)
    }

    /// Submit the pending uid/title as a new book.
    pub async fn add_book(&self) -> Result<Submission, Error> {
        let (uid_text, title) = {
            let view = self.lock_view();
            (view.pending_uid.clone(), view.pending_title.clone())
        };
        let Some(uid) = parse_uid(&uid_text) else {
            let err = Error::new(ErrorKind::Usage)
                .with_message(format!("uid `{uid_text}` is not a number"))
                .with_hint("Enter the book uid as a non-negative integer.");
            warn!(error = %err, "error adding book");
            return Err(err);
        };
        let from = self.acting_account("add")?;
        // The ledger has no add notification, so adds always use the settle delay.
        self.submit("add", true, move |ledger| ledger.add_book(from, uid, &title))
            .await
    }

    /// Borrow `uid` on behalf of the acting account.
    pub async fn borrow_book(&self, uid: u64) -> Result<Submission, Error> {
        let from = self.acting_account("borrow")?;
        let schedule = self.inner.settings.refresh == RefreshMode::Delay;
        self.submit("borrow", schedule, move |ledger| {
            ledger.borrow_book(from, uid, from)
        })
        .await
    }

    pub async fn return_book(&self, uid: u64) -> Result<Submission, Error> {
        let from = self.acting_account("return")?;
        let schedule = self.inner.settings.refresh == RefreshMode::Delay;
        self.submit("return", schedule, move |ledger| ledger.return_book(from, uid))
            .await
    }

    /// Start the notification poller; meaningful in `RefreshMode::Events`.
    pub fn spawn_event_watcher(&self) -> JoinHandle<()> {
        let catalog = self.clone();
        tokio::spawn(async move {
            let mut watcher = EventWatcher::new();
            let mut ticker = tokio::time::interval(catalog.inner.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = watcher.poll(&catalog).await {
                    warn!(error = %err, "error polling ledger notifications");
                }
            }
        })
    }

    async fn submit<F>(
        &self,
        action: &'static str,
        schedule_refresh: bool,
        op: F,
    ) -> Result<Submission, Error>
    where
        F: FnOnce(&dyn Ledger) -> LedgerResult<TxHash> + Send + 'static,
    {
        let ledger = Arc::clone(&self.inner.ledger);
        match run_blocking(move || op(ledger.as_ref())).await {
            Ok(tx) => {
                info!(action, %tx, "transaction submitted");
                let refresh = schedule_refresh.then(|| self.schedule_refresh());
                Ok(Submission { tx, refresh })
            }
            Err(err) => {
                warn!(action, error = %err, "transaction failed");
                Err(err)
            }
        }
    }

    fn schedule_refresh(&self) -> JoinHandle<()> {
        let catalog = self.clone();
        let delay = self.inner.settings.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = catalog.refresh().await;
        })
    }

    fn acting_account(&self, action: &'static str) -> Result<Address, Error> {
        self.inner.account.ok_or_else(|| {
            let err = no_account_error();
            warn!(action, error = %err, "transaction not sent");
            err
        })
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.inner
            .view
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Cursor over ledger notifications; refreshes the catalog when any arrive.
#[derive(Debug, Default)]
pub struct EventWatcher {
    cursor: Option<u64>,
}

impl EventWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// One poll; returns how many notifications were seen.
    pub async fn poll(&mut self, catalog: &Catalog) -> Result<usize, Error> {
        let ledger = Arc::clone(&catalog.inner.ledger);
        let cursor = self.cursor;
        let batch = run_blocking(move || ledger.events_since(cursor)).await?;
        self.cursor = Some(batch.next);
        if batch.events.is_empty() {
            return Ok(0);
        }
        for event in &batch.events {
            info!(?event, "ledger notification");
        }
        // Refresh failures are logged inside; the cursor still advances.
        let _ = catalog.refresh().await;
        Ok(batch.events.len())
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("ledger task failed")
            .with_source(err)
    })?
}

#[cfg(test)]
mod tests {
    use super::{
        Catalog, CatalogSettings, EventWatcher, RefreshMode, RefreshOutcome, Submission,
    };
    use crate::api::{MemoryLedger, Session};
    use crate::core::abi::Address;
    use crate::core::error::ErrorKind;
    use crate::core::ledger::{EventBatch, Ledger, LedgerResult, TxHash};
    use crate::core::record::Record;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn reader() -> Address {
        "0x00000000000000000000000000000000000000aa"
            .parse()
            .expect("address")
    }

    fn settings(refresh: RefreshMode) -> CatalogSettings {
        CatalogSettings {
            settle_delay: Duration::from_millis(5),
            refresh,
            poll_interval: Duration::from_millis(5),
        }
    }

    fn catalog_with(ledger: Arc<MemoryLedger>, refresh: RefreshMode) -> Catalog {
        let session = Session::attach(ledger, Some(reader()));
        Catalog::new(&session, settings(refresh))
    }

    fn uids(books: &[crate::core::record::Book]) -> Vec<u64> {
        books.iter().map(|book| book.uid).collect()
    }

    #[tokio::test]
    async fn add_then_refresh_lists_new_book() {
        let ledger = Arc::new(MemoryLedger::new());
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Delay);
        catalog.set_pending_uid("5");
        catalog.set_pending_title("New Book");

        let submission = catalog.add_book().await.expect("add");
        assert!(submission.refresh_scheduled());
        submission.settled().await;

        let snapshot = catalog.snapshot();
        assert_eq!(uids(&snapshot.available), vec![5]);
        assert_eq!(snapshot.available[0].title, "New Book");
        assert!(snapshot.borrowed.is_empty());
        assert_eq!(snapshot.pending_uid, "5");
    }

    #[tokio::test]
    async fn borrow_and_return_move_book_between_lists() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.push_record(Record::new(1, "A", Address::ZERO));
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Delay);
        catalog.refresh().await.expect("refresh");

        catalog.borrow_book(1).await.expect("borrow").settled().await;
        let snapshot = catalog.snapshot();
        assert!(snapshot.available.is_empty());
        assert_eq!(uids(&snapshot.borrowed), vec![1]);
        assert_eq!(snapshot.borrowed[0].borrower, reader());

        catalog.return_book(1).await.expect("return").settled().await;
        let snapshot = catalog.snapshot();
        assert_eq!(uids(&snapshot.available), vec![1]);
        assert!(snapshot.available[0].borrower.is_zero());
        assert!(snapshot.borrowed.is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_lists_unchanged() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.push_record(Record::new(1, "A", Address::ZERO));
        ledger.push_record(Record::new(2, "B", reader()));
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Delay);
        catalog.refresh().await.expect("refresh");
        let before = catalog.snapshot();

        ledger.fail_next_writes(1);
        let err = catalog.borrow_book(1).await.err().expect("write fails");
        assert_eq!(err.kind(), ErrorKind::Io);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(catalog.snapshot(), before);
    }

    #[tokio::test]
    async fn non_numeric_uid_never_reaches_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Delay);
        catalog.set_pending_uid("abc");
        catalog.set_pending_title("Title");
        let err = catalog.add_book().await.err().expect("usage");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(ledger.records().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_lists() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.push_record(Record::new(1, "A", Address::ZERO));
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Delay);
        catalog.refresh().await.expect("refresh");

        ledger.push_record(Record::new(2, "B", Address::ZERO));
        ledger.fail_reads_from(2);
        catalog.refresh().await.expect_err("partial scan fails");
        assert_eq!(uids(&catalog.snapshot().available), vec![1]);
    }

    #[tokio::test]
    async fn missing_account_blocks_writes() {
        let ledger = Arc::new(MemoryLedger::new().with_accounts(Vec::new()));
        let session = Session::attach(ledger, None);
        let catalog = Catalog::new(&session, settings(RefreshMode::Delay));
        let err = catalog.return_book(1).await.err().expect("no account");
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn events_mode_refreshes_on_notification() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.push_record(Record::new(3, "C", Address::ZERO));
        let catalog = catalog_with(Arc::clone(&ledger), RefreshMode::Events);
        catalog.refresh().await.expect("refresh");

        let mut watcher = EventWatcher::new();
        assert_eq!(watcher.poll(&catalog).await.expect("prime"), 0);

        let submission = catalog.borrow_book(3).await.expect("borrow");
        assert!(!submission.refresh_scheduled());
        assert_eq!(uids(&catalog.snapshot().available), vec![3]);

        assert_eq!(watcher.poll(&catalog).await.expect("poll"), 1);
        assert_eq!(uids(&catalog.snapshot().borrowed), vec![3]);
        assert_eq!(watcher.poll(&catalog).await.expect("poll"), 0);
    }

    /// Reports the count it saw, then parks until released.
    struct GatedLedger {
        inner: Arc<MemoryLedger>,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl Ledger for GatedLedger {
        fn chain_id(&self) -> LedgerResult<u64> {
            self.inner.chain_id()
        }
        fn accounts(&self) -> LedgerResult<Vec<Address>> {
            self.inner.accounts()
        }
        fn book_count(&self) -> LedgerResult<u64> {
            let count = self.inner.book_count()?;
            let gate = self.gate.lock().expect("gate").take();
            if let Some((entered, release)) = gate {
                entered.send(()).expect("signal");
                release.recv().expect("release");
            }
            Ok(count)
        }
        fn book(&self, index: u64) -> LedgerResult<Record> {
            self.inner.book(index)
        }
        fn add_book(&self, from: Address, uid: u64, title: &str) -> LedgerResult<TxHash> {
            self.inner.add_book(from, uid, title)
        }
        fn borrow_book(&self, from: Address, uid: u64, borrower: Address) -> LedgerResult<TxHash> {
            self.inner.borrow_book(from, uid, borrower)
        }
        fn return_book(&self, from: Address, uid: u64) -> LedgerResult<TxHash> {
            self.inner.return_book(from, uid)
        }
        fn events_since(&self, cursor: Option<u64>) -> LedgerResult<EventBatch> {
            self.inner.events_since(cursor)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_refresh_never_overwrites_newer_one() {
        let memory = Arc::new(MemoryLedger::new());
        memory.push_record(Record::new(1, "A", Address::ZERO));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(GatedLedger {
            inner: Arc::clone(&memory),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        let session = Session::attach(gated, Some(reader()));
        let catalog = Catalog::new(&session, settings(RefreshMode::Delay));

        let first = tokio::spawn({
            let catalog = catalog.clone();
            async move { catalog.refresh().await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .expect("join")
            .expect("entered");

        memory.push_record(Record::new(2, "B", Address::ZERO));
        let second = catalog.refresh().await.expect("second refresh");
        assert_eq!(second, RefreshOutcome::Committed);

        release_tx.send(()).expect("release");
        let first = first.await.expect("join").expect("first refresh");
        assert_eq!(first, RefreshOutcome::Superseded);
        assert_eq!(uids(&catalog.snapshot().available), vec![1, 2]);
    }

    #[tokio::test]
    async fn settled_reports_a_panicked_refresh() {
        let submission = Submission {
            tx: TxHash("0x01".to_string()),
            refresh: Some(tokio::spawn(async { panic!("refresh task died") })),
        };
        assert!(!submission.settled().await);

        let immediate = Submission {
            tx: TxHash("0x02".to_string()),
            refresh: None,
        };
        assert!(immediate.settled().await);
    }
}
