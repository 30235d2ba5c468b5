//! Repository
//!
//! Reconciles one remote and one local store for a content kind. Every
//! operation is gated on the session: without a login (or without a
//! selected address, for address-scoped work) it returns
//! `Outcome::Skipped` and touches nothing.
//!
//! Public operations of one repository are serialized on an async lane.
//! Background workers (poll loop, push consumer) hold only a weak
//! reference and stop at the next loop boundary after `shutdown` or when
//! the repository is dropped.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::content::{ContentKind, SyncStyle};
use crate::api::{Credentials, FetchScope, RemoteAccess};
use crate::auth::SessionProvider;
use crate::data::{Address, LocalStore, WriteGuard};
use crate::error::AppError;
use crate::metrics::{GATE_SKIPS_TOTAL, SYNC_CYCLES_TOTAL};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DIAGNOSTICS_CAPACITY: usize = 64;

/// Why a gated operation did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotLoggedIn,
    NoAddress,
    /// The selected address moved away from the one a push channel serves
    AddressChanged,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoggedIn => "not_logged_in",
            Self::NoAddress => "no_address",
            Self::AddressChanged => "address_changed",
        }
    }
}

/// Result of a gated operation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Skipped(SkipReason),
    Done(T),
}

impl<T> Outcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Skipped(_) => None,
            Self::Done(value) => Some(value),
        }
    }
}

/// State of the local cache after a remote mutation succeeded
#[derive(Debug, Clone, PartialEq)]
pub enum CacheSync {
    Synced,
    /// The mutation went through but the cache could not be brought up to date
    Stale(String),
}

/// Primary result of a mutation plus the secondary cache outcome
#[derive(Debug, Clone, PartialEq)]
pub struct MutationReport<T> {
    pub value: T,
    pub cache: CacheSync,
}

/// A secondary failure published on the diagnostics channel
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDiagnostic {
    pub kind: &'static str,
    pub operation: &'static str,
    pub message: String,
}

struct Grant {
    credentials: Credentials,
    address: Option<Address>,
    guard: WriteGuard,
}

/// Synchronization orchestrator for one content kind
pub struct Repository<K: ContentKind> {
    session: Arc<dyn SessionProvider>,
    remote: Arc<dyn RemoteAccess<K>>,
    store: Arc<dyn LocalStore<K::Record>>,
    lane: Mutex<()>,
    diagnostics: broadcast::Sender<SyncDiagnostic>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl<K: ContentKind> Repository<K> {
    pub fn new(
        session: Arc<dyn SessionProvider>,
        remote: Arc<dyn RemoteAccess<K>>,
        store: Arc<dyn LocalStore<K::Record>>,
    ) -> Self {
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            session,
            remote,
            store,
            lane: Mutex::new(()),
            diagnostics,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown,
            workers: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Subscribe to secondary failures
    pub fn diagnostics(&self) -> broadcast::Receiver<SyncDiagnostic> {
        self.diagnostics.subscribe()
    }

    // =========================================================================
    // Cached reads
    // =========================================================================

    /// Cached records, newest first
    pub async fn cached(&self) -> Result<Vec<K::Record>, AppError> {
        self.store.all().await
    }

    pub async fn cached_count(&self) -> Result<usize, AppError> {
        self.store.count().await
    }

    /// Revision counter bumped on every effective cache change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.store.changes()
    }

    // =========================================================================
    // Gate
    // =========================================================================

    fn gate(&self, needs_address: bool) -> Result<Grant, SkipReason> {
        let guard = self.session.write_guard();
        if !self.session.is_logged_in() {
            return Err(SkipReason::NotLoggedIn);
        }
        let Some(token) = self.session.access_token() else {
            return Err(SkipReason::NotLoggedIn);
        };

        let address = self.session.current_address();
        if needs_address && address.is_none() {
            return Err(SkipReason::NoAddress);
        }

        Ok(Grant {
            credentials: Credentials::bearer(token),
            address,
            guard,
        })
    }

    fn skipped<T>(&self, operation: &'static str, reason: SkipReason) -> Outcome<T> {
        GATE_SKIPS_TOTAL
            .with_label_values(&[K::NAME, reason.as_str()])
            .inc();
        tracing::debug!(
            kind = K::NAME,
            operation,
            reason = reason.as_str(),
            "Operation skipped"
        );
        Outcome::Skipped(reason)
    }

    /// Gate for mutations, which always act as the selected address
    fn gate_mutation(&self) -> Result<(Grant, Address), SkipReason> {
        let grant = self.gate(true)?;
        match grant.address.clone() {
            Some(address) => Ok((grant, address)),
            None => Err(SkipReason::NoAddress),
        }
    }

    fn scope_for(address: Option<&Address>) -> Option<FetchScope> {
        if !K::ADDRESS_SCOPED {
            return Some(FetchScope::Everyone);
        }
        address.cloned().map(FetchScope::Address)
    }

    // =========================================================================
    // Pipelines
    // =========================================================================

    /// `None` when the session ended before the batch could be cached
    async fn fetch_and_cache(
        &self,
        scope: &FetchScope,
        grant: &Grant,
    ) -> Result<Option<usize>, AppError> {
        let batch = self.remote.fetch(scope, &grant.credentials).await?;
        self.cache_batch(batch, scope.address(), &grant.guard).await
    }

    async fn cache_batch(
        &self,
        batch: Vec<K::Remote>,
        owner: Option<&Address>,
        guard: &WriteGuard,
    ) -> Result<Option<usize>, AppError> {
        let records = batch
            .into_iter()
            .map(|remote| K::to_record(remote, owner))
            .collect::<Result<Vec<_>, _>>()?;
        let count = records.len();
        let applied = self.store.upsert_guarded(records, guard).await?;
        Ok(applied.then_some(count))
    }

    /// Record a secondary failure and describe it for the report
    fn stale(&self, operation: &'static str, error: AppError) -> CacheSync {
        let error = error.observed(operation);
        let message = error.to_string();
        tracing::warn!(
            kind = K::NAME,
            operation,
            error = %message,
            "Cache left stale after remote mutation"
        );

        let _ = self.diagnostics.send(SyncDiagnostic {
            kind: K::NAME,
            operation,
            message: message.clone(),
        });
        CacheSync::Stale(message)
    }

    async fn refresh_after(
        &self,
        operation: &'static str,
        address: &Address,
        grant: &Grant,
    ) -> CacheSync {
        let scope = Self::scope_for(Some(address)).unwrap_or(FetchScope::Everyone);
        match self.fetch_and_cache(&scope, grant).await {
            Ok(Some(_)) => CacheSync::Synced,
            Ok(None) => {
                tracing::debug!(kind = K::NAME, operation, "Session ended before cache refresh");
                CacheSync::Stale("session ended before the cache was refreshed".to_string())
            }
            Err(e) => self.stale(operation, e),
        }
    }

    /// Fetch the remote list and upsert it into the cache
    ///
    /// Returns the number of records cached. Remote and store failures
    /// are propagated.
    pub async fn refresh(&self) -> Result<Outcome<usize>, AppError> {
        let _lane = self.lane.lock().await;

        let grant = match self.gate(K::ADDRESS_SCOPED) {
            Ok(grant) => grant,
            Err(reason) => return Ok(self.skipped("refresh", reason)),
        };
        let Some(scope) = Self::scope_for(grant.address.as_ref()) else {
            return Ok(self.skipped("refresh", SkipReason::NoAddress));
        };

        let Some(count) = self.fetch_and_cache(&scope, &grant).await? else {
            return Ok(self.skipped("refresh", SkipReason::NotLoggedIn));
        };
        tracing::debug!(kind = K::NAME, count, "Cache refreshed");
        Ok(Outcome::Done(count))
    }

    /// Create remotely, then refresh the cache
    pub async fn create(
        &self,
        draft: K::Draft,
    ) -> Result<Outcome<MutationReport<K::Remote>>, AppError> {
        let _lane = self.lane.lock().await;

        let (grant, address) = match self.gate_mutation() {
            Ok(granted) => granted,
            Err(reason) => return Ok(self.skipped("create", reason)),
        };

        let created = self
            .remote
            .create(&address, draft, &grant.credentials)
            .await?;
        tracing::info!(kind = K::NAME, address = %address, "Remote record created");

        let cache = self.refresh_after("create", &address, &grant).await;
        Ok(Outcome::Done(MutationReport {
            value: created,
            cache,
        }))
    }

    /// Update remotely, then refresh the cache
    pub async fn update(
        &self,
        id: &str,
        patch: K::Patch,
    ) -> Result<Outcome<MutationReport<K::Remote>>, AppError> {
        let _lane = self.lane.lock().await;

        let (grant, address) = match self.gate_mutation() {
            Ok(granted) => granted,
            Err(reason) => return Ok(self.skipped("update", reason)),
        };

        let updated = self
            .remote
            .update(&address, id, patch, &grant.credentials)
            .await?;
        tracing::info!(kind = K::NAME, address = %address, id, "Remote record updated");

        let cache = self.refresh_after("update", &address, &grant).await;
        Ok(Outcome::Done(MutationReport {
            value: updated,
            cache,
        }))
    }

    /// Delete remotely, then evict locally
    ///
    /// A failed eviction leaves the report `Stale`; it is not an error.
    pub async fn delete(&self, id: &str) -> Result<Outcome<MutationReport<()>>, AppError> {
        let _lane = self.lane.lock().await;

        let (grant, address) = match self.gate_mutation() {
            Ok(granted) => granted,
            Err(reason) => return Ok(self.skipped("delete", reason)),
        };

        self.remote.delete(&address, id, &grant.credentials).await?;
        tracing::info!(kind = K::NAME, address = %address, id, "Remote record deleted");

        let evicted = match K::local_key(Some(&address), id) {
            Ok(key) => self.store.delete(&key).await,
            Err(e) => Err(e),
        };
        let cache = match evicted {
            Ok(()) => CacheSync::Synced,
            Err(e) => self.stale("delete", e),
        };

        Ok(Outcome::Done(MutationReport { value: (), cache }))
    }

    /// Upsert one push-channel batch opened for `opened_for`
    ///
    /// Re-gated per batch: dropped unless still logged in with
    /// `opened_for` selected.
    pub(crate) async fn consume_batch(
        &self,
        opened_for: &Address,
        batch: Vec<K::Remote>,
    ) -> Result<Outcome<usize>, AppError> {
        let _lane = self.lane.lock().await;

        let grant = match self.gate(true) {
            Ok(grant) => grant,
            Err(reason) => return Ok(self.skipped("push", reason)),
        };
        if grant.address.as_ref() != Some(opened_for) {
            return Ok(self.skipped("push", SkipReason::AddressChanged));
        }

        match self.cache_batch(batch, Some(opened_for), &grant.guard).await? {
            Some(count) => Ok(Outcome::Done(count)),
            None => Ok(self.skipped("push", SkipReason::NotLoggedIn)),
        }
    }

    // =========================================================================
    // Background workers
    // =========================================================================

    /// Start the background worker for this kind's sync style
    ///
    /// Poll kinds get a recurring refresh, push kinds a channel consumer,
    /// on-demand kinds nothing.
    pub fn start(self: &Arc<Self>) {
        let handle = match K::SYNC {
            SyncStyle::Poll => self.spawn_poll_loop(),
            SyncStyle::Push => self.spawn_push_consumer(),
            SyncStyle::OnDemand => return,
        };

        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        tracing::info!(kind = K::NAME, "Background sync started");
    }

    /// Signal the workers and wait for them to reach a loop boundary
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(kind = K::NAME, error = %e, "Background worker panicked");
            }
        }
        tracing::info!(kind = K::NAME, "Background sync stopped");
    }

    async fn sync_cycle(&self) {
        let result = match self.refresh().await {
            Ok(Outcome::Done(_)) => "ok",
            Ok(Outcome::Skipped(_)) => "skipped",
            Err(e) => {
                let e = e.observed("poll");
                tracing::warn!(kind = K::NAME, error = %e, "Poll sync failed");
                "error"
            }
        };
        SYNC_CYCLES_TOTAL.with_label_values(&[K::NAME, result]).inc();
    }

    fn spawn_poll_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let repository = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                let Some(repository) = repository.upgrade() else {
                    break;
                };
                repository.sync_cycle().await;
            }

            tracing::debug!(kind = K::NAME, "Poll loop exited");
        })
    }

    /// Open the push channel for the current session, if the gate allows
    fn open_updates(&self) -> Option<(Address, mpsc::Receiver<Vec<K::Remote>>)> {
        let (grant, address) = match self.gate_mutation() {
            Ok(granted) => granted,
            Err(reason) => {
                tracing::debug!(
                    kind = K::NAME,
                    reason = reason.as_str(),
                    "Push channel not opened"
                );
                return None;
            }
        };

        match self.remote.updates(&address, &grant.credentials) {
            Some(channel) => {
                tracing::info!(kind = K::NAME, address = %address, "Push channel opened");
                Some((address, channel))
            }
            None => {
                tracing::warn!(kind = K::NAME, "Remote offers no push channel");
                None
            }
        }
    }

    fn spawn_push_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let repository = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let mut accounts = self.session.account_changes();
        let mut addresses = self.session.address_changes();

        tokio::spawn(async move {
            'session: loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                accounts.borrow_and_update();
                addresses.borrow_and_update();

                let Some(mut channel) = upgrade(&repository).map(|r| r.open_updates()) else {
                    break;
                };

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break 'session,
                        changed = accounts.changed() => {
                            if changed.is_err() {
                                break 'session;
                            }
                            continue 'session;
                        }
                        changed = addresses.changed() => {
                            if changed.is_err() {
                                break 'session;
                            }
                            continue 'session;
                        }
                        batch = next_batch(&mut channel) => {
                            let Some((opened_for, batch)) = batch else {
                                tracing::debug!(kind = K::NAME, "Push channel ended");
                                channel = None;
                                continue;
                            };
                            let Some(repository) = upgrade(&repository) else {
                                break 'session;
                            };
                            match repository.consume_batch(&opened_for, batch).await {
                                Ok(Outcome::Done(count)) => {
                                    SYNC_CYCLES_TOTAL.with_label_values(&[K::NAME, "ok"]).inc();
                                    tracing::debug!(kind = K::NAME, count, "Push batch cached");
                                }
                                Ok(Outcome::Skipped(_)) => {
                                    SYNC_CYCLES_TOTAL
                                        .with_label_values(&[K::NAME, "skipped"])
                                        .inc();
                                }
                                Err(e) => {
                                    let e = e.observed("push");
                                    SYNC_CYCLES_TOTAL.with_label_values(&[K::NAME, "error"]).inc();
                                    tracing::warn!(
                                        kind = K::NAME,
                                        error = %e,
                                        "Push batch not cached"
                                    );
                                }
                            }
                        }
                    }
                }
            }

            tracing::debug!(kind = K::NAME, "Push consumer exited");
        })
    }
}

fn upgrade<K: ContentKind>(repository: &Weak<Repository<K>>) -> Option<Arc<Repository<K>>> {
    repository.upgrade()
}

/// Next batch from an open channel; pends forever when none is open
async fn next_batch<T>(
    channel: &mut Option<(Address, mpsc::Receiver<T>)>,
) -> Option<(Address, T)> {
    match channel {
        Some((address, receiver)) => receiver.recv().await.map(|batch| (address.clone(), batch)),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{NowDraft, PurlDraft, PurlDto, StatusDto};
    use crate::auth::{AddressGrant, Profile, SessionManager};
    use crate::data::{
        EntityKind, MemoryStore, MutationContext, NowPageRecord, PurlRecord, StatusRecord, StoreKey,
    };
    use crate::service::content::{Bookmarks, NowPage, Timeline};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn signed_in(select: Option<&str>) -> Arc<SessionManager> {
        let session = Arc::new(SessionManager::new());
        session
            .sign_in(
                Profile {
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                },
                vec![AddressGrant::new("alice"), AddressGrant::new("alice-blog")],
                "token",
            )
            .unwrap();
        if let Some(address) = select {
            session.select_address(address).unwrap();
        }
        session
    }

    fn purl(name: &str) -> PurlDto {
        PurlDto {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            counter: None,
            listed: true,
        }
    }

    /// Remote bookmark list held in memory
    #[derive(Default)]
    struct FakePurls {
        list: StdMutex<Vec<PurlDto>>,
        fetches: AtomicUsize,
        fail_create: AtomicBool,
        fail_fetch: AtomicBool,
        channel: StdMutex<Option<mpsc::Receiver<Vec<PurlDto>>>>,
    }

    #[async_trait]
    impl RemoteAccess<Bookmarks> for FakePurls {
        async fn fetch(
            &self,
            scope: &FetchScope,
            _credentials: &Credentials,
        ) -> Result<Vec<PurlDto>, AppError> {
            assert!(scope.address().is_some());
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(AppError::Api {
                    status: 503,
                    message: "maintenance".to_string(),
                });
            }
            Ok(self.list.lock().unwrap().clone())
        }

        async fn create(
            &self,
            _address: &Address,
            draft: PurlDraft,
            _credentials: &Credentials,
        ) -> Result<PurlDto, AppError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(AppError::Api {
                    status: 409,
                    message: "taken".to_string(),
                });
            }
            let created = purl(&draft.name);
            self.list.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn delete(
            &self,
            _address: &Address,
            name: &str,
            _credentials: &Credentials,
        ) -> Result<(), AppError> {
            self.list.lock().unwrap().retain(|p| p.name != name);
            Ok(())
        }

        fn updates(
            &self,
            _address: &Address,
            _credentials: &Credentials,
        ) -> Option<mpsc::Receiver<Vec<PurlDto>>> {
            self.channel.lock().unwrap().take()
        }
    }

    /// Store whose mutations can be made to fail
    struct FlakyStore {
        inner: Arc<MemoryStore<PurlRecord>>,
        fail_upsert: AtomicBool,
        fail_delete: AtomicBool,
    }

    #[async_trait]
    impl LocalStore<PurlRecord> for FlakyStore {
        async fn upsert_guarded(
            &self,
            batch: Vec<PurlRecord>,
            guard: &WriteGuard,
        ) -> Result<bool, AppError> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                return Err(AppError::Store("disk full".to_string()));
            }
            self.inner.upsert_guarded(batch, guard).await
        }

        async fn delete(&self, key: &StoreKey) -> Result<(), AppError> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(AppError::Store("locked".to_string()));
            }
            self.inner.delete(key).await
        }

        async fn wipe(&self, kinds: &[EntityKind]) -> Result<(), AppError> {
            self.inner.wipe(kinds).await
        }

        async fn get(&self, key: &StoreKey) -> Result<Option<PurlRecord>, AppError> {
            self.inner.get(key).await
        }

        async fn all(&self) -> Result<Vec<PurlRecord>, AppError> {
            self.inner.all().await
        }

        async fn count(&self) -> Result<usize, AppError> {
            self.inner.count().await
        }

        fn changes(&self) -> watch::Receiver<u64> {
            self.inner.changes()
        }
    }

    struct Fixture {
        session: Arc<SessionManager>,
        remote: Arc<FakePurls>,
        store: Arc<FlakyStore>,
        repository: Arc<Repository<Bookmarks>>,
    }

    fn fixture(select: Option<&str>) -> Fixture {
        let session = signed_in(select);
        let remote = Arc::new(FakePurls::default());
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::open(MutationContext::spawn(), session.logout_events()),
            fail_upsert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        });
        let repository = Arc::new(Repository::<Bookmarks>::new(
            session.clone(),
            remote.clone(),
            store.clone(),
        ));

        Fixture {
            session,
            remote,
            store,
            repository,
        }
    }

    fn draft(name: &str) -> PurlDraft {
        PurlDraft {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            listed: true,
        }
    }

    #[tokio::test]
    async fn test_refresh_skips_when_logged_out() {
        let f = fixture(Some("alice"));
        f.session.logout();

        let outcome = f.repository.refresh().await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotLoggedIn));
        assert_eq!(f.remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scoped_operations_skip_without_address() {
        let f = fixture(None);

        assert_eq!(
            f.repository.refresh().await.unwrap(),
            Outcome::Skipped(SkipReason::NoAddress)
        );
        assert!(f.repository.create(draft("home")).await.unwrap().is_skipped());
        assert_eq!(f.remote.fetches.load(Ordering::SeqCst), 0);
        assert!(f.remote.list.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let f = fixture(Some("alice"));

        let report = f.repository.create(draft("home")).await.unwrap().done().unwrap();
        assert_eq!(report.value.name, "home");
        assert_eq!(report.cache, CacheSync::Synced);

        let cached = f.repository.cached().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].address.as_str(), "alice");
        assert_eq!(cached[0].name, "home");
    }

    #[tokio::test]
    async fn test_remote_failure_is_propagated_without_local_write() {
        let f = fixture(Some("alice"));
        f.remote.fail_create.store(true, Ordering::SeqCst);

        let result = f.repository.create(draft("home")).await;
        assert!(matches!(result, Err(AppError::Api { status: 409, .. })));
        assert_eq!(f.repository.cached_count().await.unwrap(), 0);
        assert_eq!(f.remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_after_create_is_secondary() {
        let f = fixture(Some("alice"));
        let mut diagnostics = f.repository.diagnostics();
        f.store.fail_upsert.store(true, Ordering::SeqCst);

        let report = f.repository.create(draft("home")).await.unwrap().done().unwrap();
        assert!(matches!(report.cache, CacheSync::Stale(ref m) if m.contains("disk full")));

        let diagnostic = diagnostics.recv().await.unwrap();
        assert_eq!(diagnostic.kind, "bookmarks");
        assert_eq!(diagnostic.operation, "create");
    }

    #[tokio::test]
    async fn test_refresh_failure_after_update_is_secondary() {
        let f = fixture(Some("alice"));
        f.remote.fail_fetch.store(true, Ordering::SeqCst);

        let report = f.repository.create(draft("home")).await.unwrap().done().unwrap();
        assert!(matches!(report.cache, CacheSync::Stale(_)));
    }

    #[tokio::test]
    async fn test_primary_refresh_propagates_store_failure() {
        let f = fixture(Some("alice"));
        f.remote.list.lock().unwrap().push(purl("home"));
        f.store.fail_upsert.store(true, Ordering::SeqCst);

        assert!(matches!(
            f.repository.refresh().await,
            Err(AppError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_eviction_failure_after_delete_is_swallowed() {
        let f = fixture(Some("alice"));
        f.remote.list.lock().unwrap().push(purl("home"));
        f.repository.refresh().await.unwrap();
        f.store.fail_delete.store(true, Ordering::SeqCst);

        let report = f.repository.delete("home").await.unwrap().done().unwrap();
        assert!(matches!(report.cache, CacheSync::Stale(_)));
        assert!(f.remote.list.lock().unwrap().is_empty());
        assert_eq!(f.repository.cached_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_evicts_local_entity() {
        let f = fixture(Some("alice"));
        f.remote.list.lock().unwrap().push(purl("home"));
        f.repository.refresh().await.unwrap();

        let report = f.repository.delete("home").await.unwrap().done().unwrap();
        assert_eq!(report.cache, CacheSync::Synced);
        assert_eq!(f.repository.cached_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_batch_is_regated_against_address() {
        let f = fixture(Some("alice-blog"));
        let alice = Address::new("alice");

        let outcome = f
            .repository
            .consume_batch(&alice, vec![purl("home")])
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::AddressChanged));
        assert_eq!(f.repository.cached_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_consumer_caches_batches() {
        let f = fixture(Some("alice"));
        let (sender, receiver) = mpsc::channel(4);
        *f.remote.channel.lock().unwrap() = Some(receiver);
        let mut changes = f.repository.changes();

        f.repository.start();
        sender.send(vec![purl("home"), purl("blog")]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.repository.cached_count().await.unwrap(), 2);

        f.repository.shutdown().await;
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_push_consumer_drops_channel_on_address_change() {
        let f = fixture(Some("alice"));
        let (sender, receiver) = mpsc::channel(4);
        *f.remote.channel.lock().unwrap() = Some(receiver);

        let mut changes = f.repository.changes();

        f.repository.start();
        sender.send(vec![purl("home")]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();

        f.session.select_address("alice-blog").unwrap();
        tokio::time::timeout(Duration::from_secs(5), sender.closed())
            .await
            .unwrap();
        f.repository.shutdown().await;
    }

    #[tokio::test]
    async fn test_logout_wipes_cached_entities() {
        let f = fixture(Some("alice"));
        f.remote.list.lock().unwrap().push(purl("home"));
        f.repository.refresh().await.unwrap();
        let mut changes = f.repository.changes();
        changes.borrow_and_update();

        f.session.logout();
        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.repository.cached_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_not_implemented() {
        struct NoNow;

        #[async_trait]
        impl RemoteAccess<NowPage> for NoNow {
            async fn fetch(
                &self,
                _scope: &FetchScope,
                _credentials: &Credentials,
            ) -> Result<Vec<crate::api::dto::NowDto>, AppError> {
                Ok(Vec::new())
            }
        }

        let session = signed_in(Some("alice"));
        let repository = Repository::<NowPage>::new(
            session.clone(),
            Arc::new(NoNow),
            MemoryStore::<NowPageRecord>::open(MutationContext::spawn(), session.logout_events()),
        );

        let result = repository
            .create(NowDraft {
                content: "hello".to_string(),
                listed: true,
            })
            .await;
        assert!(matches!(result, Err(AppError::NotImplemented(_))));
    }

    /// Service-wide feed counting its reads
    #[derive(Default)]
    struct FakeFeed {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl RemoteAccess<Timeline> for FakeFeed {
        async fn fetch(
            &self,
            scope: &FetchScope,
            _credentials: &Credentials,
        ) -> Result<Vec<StatusDto>, AppError> {
            assert_eq!(scope, &FetchScope::Everyone);
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(AppError::Api {
                    status: 500,
                    message: "hiccup".to_string(),
                });
            }
            Ok(vec![StatusDto {
                id: format!("s{n}"),
                address: "bob".to_string(),
                created_at: DateTime::from_timestamp(1_700_000_000 + n as i64, 0).unwrap(),
                emoji: None,
                content: "hi".to_string(),
                external_url: None,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_survives_errors_and_stops_on_shutdown() {
        let session = signed_in(None);
        let remote = Arc::new(FakeFeed::default());
        let store =
            MemoryStore::<StatusRecord>::open(MutationContext::spawn(), session.logout_events());
        let repository = Arc::new(
            Repository::<Timeline>::new(session.clone(), remote.clone(), store)
                .with_poll_interval(Duration::from_secs(30)),
        );

        repository.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(remote.fetches.load(Ordering::SeqCst) >= 3);
        assert_eq!(repository.cached_count().await.unwrap(), 2);

        repository.shutdown().await;
        let after_shutdown = remote.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), after_shutdown);
    }

    /// Remote whose fetch parks until released
    #[derive(Default)]
    struct StalledPurls {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl RemoteAccess<Bookmarks> for StalledPurls {
        async fn fetch(
            &self,
            _scope: &FetchScope,
            _credentials: &Credentials,
        ) -> Result<Vec<PurlDto>, AppError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec![purl("home")])
        }
    }

    fn stalled(
        session: &Arc<SessionManager>,
    ) -> (
        Arc<StalledPurls>,
        Arc<MemoryStore<PurlRecord>>,
        Arc<Repository<Bookmarks>>,
    ) {
        let remote = Arc::new(StalledPurls::default());
        let store =
            MemoryStore::<PurlRecord>::open(MutationContext::spawn(), session.logout_events());
        let repository = Arc::new(Repository::<Bookmarks>::new(
            session.clone(),
            remote.clone(),
            store.clone(),
        ));
        (remote, store, repository)
    }

    #[tokio::test]
    async fn test_refresh_in_flight_at_logout_leaves_cache_empty() {
        let session = signed_in(Some("alice"));
        let (remote, store, repository) = stalled(&session);

        let pending = tokio::spawn({
            let repository = repository.clone();
            async move { repository.refresh().await }
        });
        remote.started.notified().await;

        session.logout();
        tokio::time::sleep(Duration::from_millis(50)).await;
        remote.release.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotLoggedIn));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_from_previous_session_is_not_cached_for_next() {
        let session = signed_in(Some("alice"));
        let (remote, store, repository) = stalled(&session);

        let pending = tokio::spawn({
            let repository = repository.clone();
            async move { repository.refresh().await }
        });
        remote.started.notified().await;

        session.logout();
        session
            .sign_in(
                Profile {
                    name: "Bob".to_string(),
                    email: "bob@example.com".to_string(),
                },
                vec![AddressGrant::new("alice")],
                "other-token",
            )
            .unwrap();
        remote.release.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert!(outcome.is_skipped());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
