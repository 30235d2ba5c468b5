//! omgsync - Remote-backed local cache synchronization for an omg.lol-style
//! hosting service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Repository<K>: gate, fetch/create/update/delete          │
//! │  - Poll loop (timeline) and push consumers (lists)          │
//! │  - Timeline mute filtering                                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                       │
//! ┌────────────────────────────┐   ┌────────────────────────────┐
//! │        API Layer           │   │        Data Layer          │
//! │  - reqwest client          │   │  - Memory / SQLite stores  │
//! │  - Envelope decoding       │   │  - Uniqueness + retention  │
//! │  - Push channels           │   │  - Mutation context        │
//! └────────────────────────────┘   └────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Session (auth)                            │
//! │  - Account, selected address, logout events                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP client and per-kind remote access
//! - `service`: Repositories and timeline filtering
//! - `data`: Records, local stores and the mutation context
//! - `auth`: Session state
//! - `config`: Configuration management
//! - `metrics`: Prometheus metrics
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use api::{ApiClient, RemoteAccess};
use auth::{AddressGrant, Profile, SessionManager, SessionProvider};
use data::{CacheDatabase, LocalStore, MemoryStore, MutationContext, SqliteStore, Storable};
use service::{
    Bookmarks, ContentKind, NowPage, Pastes, Pictures, Repository, TimelineService, WebPage,
    Weblog,
};

/// Backend every local store is opened on
enum StoreFactory {
    Memory,
    Sqlite(CacheDatabase),
}

impl StoreFactory {
    async fn from_config(config: &config::CacheConfig) -> Result<Self, error::AppError> {
        match config.backend {
            config::CacheBackend::Memory => Ok(Self::Memory),
            config::CacheBackend::Sqlite => {
                let path = config.path.as_deref().ok_or_else(|| {
                    error::AppError::Config(
                        "cache.path is required when cache.backend=sqlite".to_string(),
                    )
                })?;
                Ok(Self::Sqlite(CacheDatabase::connect(path).await?))
            }
        }
    }

    fn open<R: Storable>(
        &self,
        context: &MutationContext,
        session: &SessionManager,
    ) -> Arc<dyn LocalStore<R>> {
        match self {
            Self::Memory => MemoryStore::<R>::open(context.clone(), session.logout_events()),
            Self::Sqlite(database) => {
                SqliteStore::<R>::open(database, context.clone(), session.logout_events())
            }
        }
    }
}

/// Application state
///
/// Owns the session, the API client and one repository per content kind.
/// Cloning shares everything.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Session provider every repository gates on
    pub session: Arc<SessionManager>,

    /// API client shared by all remote accesses
    pub api: ApiClient,

    /// Designated context for all store mutations
    pub context: MutationContext,

    /// Status feed plus mute rules
    pub timeline: Arc<TimelineService>,

    pub bookmarks: Arc<Repository<Bookmarks>>,
    pub pastes: Arc<Repository<Pastes>>,
    pub pictures: Arc<Repository<Pictures>>,
    pub weblog: Arc<Repository<Weblog>>,
    pub now_page: Arc<Repository<NowPage>>,
    pub web_page: Arc<Repository<WebPage>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the API client
    /// 2. Open the cache backend
    /// 3. Start the mutation context
    /// 4. Wire one repository per content kind
    ///
    /// Background sync is not started; call `start`.
    ///
    /// # Errors
    /// Returns error if the HTTP client or the cache backend fails to
    /// initialize
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. API client
        let api =
            ApiClient::new(&config.api)?.with_updates_interval(config.sync.updates_interval());
        tracing::info!(base_url = %api.base_url(), "API client initialized");

        // 2. Cache backend
        let stores = StoreFactory::from_config(&config.cache).await?;
        tracing::info!(backend = ?config.cache.backend, "Cache backend ready");

        // 3. Session and mutation context
        let session = Arc::new(SessionManager::new());
        let context = MutationContext::spawn();

        // 4. Repositories
        let remote = Arc::new(api.clone());
        let wire = Wiring {
            session: &session,
            remote: &remote,
            stores: &stores,
            context: &context,
        };

        let timeline_repository = Arc::new(
            wire.repository::<service::Timeline>()
                .with_poll_interval(config.sync.poll_interval()),
        );
        let timeline = Arc::new(TimelineService::new(
            session.clone(),
            timeline_repository,
            stores.open(&context, &session),
            stores.open(&context, &session),
        ));

        let bookmarks = Arc::new(wire.repository::<Bookmarks>());
        let pastes = Arc::new(wire.repository::<Pastes>());
        let pictures = Arc::new(wire.repository::<Pictures>());
        let weblog = Arc::new(wire.repository::<Weblog>());
        let now_page = Arc::new(wire.repository::<NowPage>());
        let web_page = Arc::new(wire.repository::<WebPage>());

        let state = Self {
            config: Arc::new(config),
            session,
            api,
            context,
            timeline,
            bookmarks,
            pastes,
            pictures,
            weblog,
            now_page,
            web_page,
        };

        tracing::info!("Application state initialized");
        Ok(state)
    }

    /// Sign in with the token and address from `auth` configuration
    ///
    /// Returns `false` when no token is configured.
    pub fn sign_in_from_config(&self) -> Result<bool, error::AppError> {
        let Some(token) = self.config.auth.access_token.as_deref() else {
            return Ok(false);
        };

        let address = self
            .config
            .auth
            .address
            .as_deref()
            .map(data::Address::new)
            .filter(|address| !address.is_empty());

        let profile = Profile {
            name: address
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            email: String::new(),
        };
        let grants = address.iter().cloned().map(AddressGrant::new).collect();

        self.session.sign_in(profile, grants, token)?;
        if let Some(address) = address {
            self.session.select_address(address)?;
        }
        Ok(self.session.is_logged_in())
    }

    /// Start background synchronization of every repository
    pub fn start(&self) {
        self.timeline.repository().start();
        self.bookmarks.start();
        self.pastes.start();
        self.pictures.start();
        self.weblog.start();
        self.now_page.start();
        self.web_page.start();
    }

    /// Stop background synchronization and wait for the workers
    pub async fn shutdown(&self) {
        tokio::join!(
            self.timeline.repository().shutdown(),
            self.bookmarks.shutdown(),
            self.pastes.shutdown(),
            self.pictures.shutdown(),
            self.weblog.shutdown(),
            self.now_page.shutdown(),
            self.web_page.shutdown(),
        );
    }
}

/// Shared collaborators for building repositories
struct Wiring<'a> {
    session: &'a Arc<SessionManager>,
    remote: &'a Arc<ApiClient>,
    stores: &'a StoreFactory,
    context: &'a MutationContext,
}

impl Wiring<'_> {
    fn repository<K>(&self) -> Repository<K>
    where
        K: ContentKind,
        ApiClient: RemoteAccess<K>,
    {
        Repository::new(
            self.session.clone(),
            self.remote.clone(),
            self.stores.open(self.context, self.session),
        )
    }
}
