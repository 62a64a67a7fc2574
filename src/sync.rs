//! Data sync: periodic refresh of the account snapshot and history.
//!
//! A sync cycle fetches `/me` and `/history` concurrently and commits both
//! or neither. Commits carry the epoch they were started under; stopping a
//! poller or logging out advances the epoch so late responses are dropped.

use crate::activity::ActivityLog;
use crate::api::{ApiClient, ApiError};
use crate::models::{Account, TransactionRecord};
use crate::navigator::Navigator;
use crate::session::SessionStore;
use rust_decimal::Decimal;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Latest server state as of the last completed fetch
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub account: Option<Account>,
    pub records: Vec<TransactionRecord>,
    /// Number of updates applied
    pub version: u64,
}

#[derive(Default)]
struct StoreInner {
    snapshot: Snapshot,
    epoch: u64,
}

#[derive(Default)]
pub struct LedgerStore {
    inner: Mutex<StoreInner>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A poisoned lock still holds a consistent snapshot: every update
        // below is a single assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn account(&self) -> Option<Account> {
        self.lock().snapshot.account.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn begin_epoch(&self) -> u64 {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.epoch
    }

    /// Invalidate an epoch; anything still in flight under it is ignored.
    pub fn retire(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch {
            inner.epoch += 1;
        }
    }

    /// Drop everything (logout)
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.snapshot = Snapshot::default();
    }

    pub fn commit_cycle(
        &self,
        epoch: u64,
        account: Account,
        records: Vec<TransactionRecord>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        let version = inner.snapshot.version + 1;
        inner.snapshot = Snapshot {
            account: Some(account),
            records,
            version,
        };
        true
    }

    pub fn replace_history(&self, epoch: u64, records: Vec<TransactionRecord>) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.snapshot.records = records;
        inner.snapshot.version += 1;
        true
    }

    /// Optimistic local debit after a confirmed transfer. Returns the new
    /// balance, or None if there is no account or the epoch is stale.
    pub fn apply_debit(&self, epoch: u64, amount: Decimal) -> Option<Decimal> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        let account = inner.snapshot.account.as_mut()?;
        account.balance -= amount;
        let balance = account.balance;
        inner.snapshot.version += 1;
        Some(balance)
    }
}

/// Fetch account and history concurrently; both must succeed.
pub fn fetch_cycle(api: &ApiClient) -> Result<(Account, Vec<TransactionRecord>), ApiError> {
    thread::scope(|s| {
        let account = s.spawn(|| api.fetch_account());
        let history = api.fetch_history();
        let account = account
            .join()
            .map_err(|_| ApiError::Transport("account fetch panicked".to_string()))?;
        Ok((account?, history?))
    })
}

#[derive(Clone)]
pub struct DataSync {
    api: Arc<ApiClient>,
    store: Arc<LedgerStore>,
    session: Arc<SessionStore>,
    navigator: Arc<Navigator>,
    activity: Arc<ActivityLog>,
    interval: Duration,
}

impl DataSync {
    pub fn new(
        api: Arc<ApiClient>,
        store: Arc<LedgerStore>,
        session: Arc<SessionStore>,
        navigator: Arc<Navigator>,
        activity: Arc<ActivityLog>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            store,
            session,
            navigator,
            activity,
            interval,
        }
    }

    /// Enter the protected surface: sync now, then every `interval` until
    /// the returned handle is stopped or dropped. Returns None (and sends the
    /// user to login) when there is no valid session.
    pub fn start(&self) -> Option<PollerHandle> {
        if !self.session.is_authenticated() {
            self.session.terminate();
            self.navigator.redirect_to_login();
            return None;
        }

        let epoch = self.store.begin_epoch();
        if let Err(ApiError::Unauthorized) = self.run_cycle(epoch) {
            self.store.retire(epoch);
            return None;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = self.clone();
        let thread = thread::Builder::new()
            .name("p2p-sync".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(worker.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    if worker.store.epoch() != epoch || worker.session.token().is_none() {
                        break;
                    }
                    if let Err(ApiError::Unauthorized) = worker.run_cycle(epoch) {
                        break;
                    }
                }
            });
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("Warning: background sync unavailable: {}", e);
                None
            }
        };

        Some(PollerHandle {
            epoch,
            store: self.store.clone(),
            stop_tx: Some(stop_tx),
            thread,
        })
    }

    /// One fetch cycle committed under `epoch`. Failures leave the snapshot
    /// untouched; the next tick is the retry.
    pub fn run_cycle(&self, epoch: u64) -> Result<bool, ApiError> {
        let start = Instant::now();
        let result = fetch_cycle(&self.api);
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((account, records)) => {
                let count = records.len();
                let applied = self.store.commit_cycle(epoch, account, records);
                let _ = self.activity.sync_cycle(applied, count, duration_ms, None);
                Ok(applied)
            }
            Err(e) => {
                let _ = self
                    .activity
                    .sync_cycle(false, 0, duration_ms, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    /// Out-of-cycle refresh of the account and history
    pub fn refresh(&self) -> Result<bool, ApiError> {
        self.run_cycle(self.store.epoch())
    }
}

/// Running poller. Dropping it stops the schedule.
pub struct PollerHandle {
    epoch: u64,
    store: Arc<LedgerStore>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    #[cfg(test)]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stop and wait for the worker to exit. At most one in-flight request
    /// is waited on; its result is discarded.
    pub fn stop(mut self) {
        self.signal();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn signal(&mut self) {
        self.store.retire(self.epoch);
        self.stop_tx.take();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::Surface;
    use crate::testutil::{account_json, record_json, Harness};
    use serde_json::json;

    fn sync_for(h: &Harness, interval: Duration) -> DataSync {
        DataSync::new(
            h.api.clone(),
            h.store.clone(),
            h.session.clone(),
            h.navigator.clone(),
            h.activity.clone(),
            interval,
        )
    }

    fn script_ok(h: &Harness, balance: f64) {
        h.transport
            .respond("/me", 200, account_json(1, "a@x.com", balance));
        h.transport.respond(
            "/history",
            200,
            json!([
                record_json(2, 1, 7, 10.0, "2025-03-02T10:00:00"),
                record_json(1, 7, 1, 50.0, "2025-03-01T10:00:00"),
            ]),
        );
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_start_without_session_issues_no_requests() {
        let h = Harness::logged_out();
        h.navigator.navigate(Surface::Account);
        let sync = sync_for(&h, Duration::from_millis(10));
        assert!(sync.start().is_none());
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.navigator.current(), Surface::Login);
    }

    #[test]
    fn test_start_runs_immediate_cycle() {
        let h = Harness::logged_in();
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_secs(60));
        let handle = sync.start().unwrap();

        let snap = h.store.snapshot();
        assert_eq!(snap.account.unwrap().balance, Decimal::new(100, 0));
        assert_eq!(snap.records.len(), 2);
        assert_eq!(snap.version, 1);
        handle.stop();
    }

    #[test]
    fn test_partial_failure_commits_nothing() {
        let h = Harness::logged_in();
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_secs(60));
        let epoch = h.store.begin_epoch();
        assert!(sync.run_cycle(epoch).unwrap());

        h.transport.reset("/me");
        h.transport.respond("/me", 200, account_json(1, "a@x.com", 5.0));
        h.transport.reset("/history");
        h.transport
            .respond("/history", 500, json!({ "detail": "database down" }));
        assert!(sync.run_cycle(epoch).is_err());

        let snap = h.store.snapshot();
        assert_eq!(snap.account.unwrap().balance, Decimal::new(100, 0));
        assert_eq!(snap.records.len(), 2);
        assert_eq!(snap.version, 1);
    }

    #[test]
    fn test_polls_until_stopped() {
        let h = Harness::logged_in();
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_millis(10));
        let handle = sync.start().unwrap();

        assert!(wait_until(Duration::from_secs(2), || h.store.snapshot().version >= 3));
        handle.stop();

        let calls = h.transport.calls_to("/me");
        thread::sleep(Duration::from_millis(60));
        assert_eq!(h.transport.calls_to("/me"), calls);
    }

    #[test]
    fn test_dropping_handle_stops_polling() {
        let h = Harness::logged_in();
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_millis(10));
        {
            let _handle = sync.start().unwrap();
            assert!(wait_until(Duration::from_secs(2), || h.store.snapshot().version >= 2));
        }
        thread::sleep(Duration::from_millis(40));
        let calls = h.transport.calls_to("/history");
        thread::sleep(Duration::from_millis(60));
        assert_eq!(h.transport.calls_to("/history"), calls);
    }

    #[test]
    fn test_stale_cycle_after_stop_is_ignored() {
        let h = Harness::logged_in();
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_secs(60));
        let handle = sync.start().unwrap();
        let epoch = handle.epoch();

        h.transport.reset("/me");
        h.transport.respond("/me", 200, account_json(1, "a@x.com", 1.0));
        h.transport.delay("/history", Duration::from_millis(100));

        let in_flight = {
            let sync = sync.clone();
            thread::spawn(move || sync.run_cycle(epoch))
        };
        thread::sleep(Duration::from_millis(20));
        handle.stop();

        assert_eq!(in_flight.join().unwrap().unwrap(), false);
        let snap = h.store.snapshot();
        assert_eq!(snap.account.unwrap().balance, Decimal::new(100, 0));
    }

    #[test]
    fn test_unauthorized_ends_polling() {
        let h = Harness::logged_in();
        h.navigator.navigate(Surface::Account);
        script_ok(&h, 100.0);
        let sync = sync_for(&h, Duration::from_millis(10));
        let handle = sync.start().unwrap();

        h.transport.reset("/me");
        h.transport.respond("/me", 401, json!({}));
        h.transport.reset("/history");
        h.transport.respond("/history", 401, json!({}));

        assert!(wait_until(Duration::from_secs(2), || h.navigator.current()
            == Surface::Login));
        handle.stop();
        let calls = h.transport.calls().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(h.transport.calls().len(), calls);
        assert_eq!(h.navigator.forced_redirects(), 1);
        assert!(h.session.token().is_none());
    }

    #[test]
    fn test_store_epoch_guards() {
        let store = LedgerStore::new();
        let epoch = store.begin_epoch();
        store.retire(epoch);
        let account: Account =
            serde_json::from_value(account_json(1, "a@x.com", 10.0)).unwrap();
        assert!(!store.commit_cycle(epoch, account.clone(), Vec::new()));
        assert!(store.apply_debit(epoch, Decimal::ONE).is_none());

        let current = store.epoch();
        assert!(store.commit_cycle(current, account, Vec::new()));
        assert_eq!(
            store.apply_debit(current, Decimal::new(250, 2)),
            Some(Decimal::new(750, 2))
        );
        store.reset();
        assert!(store.account().is_none());
    }
}
