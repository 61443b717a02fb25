//! Service layer for Sharecast
//!
//! One facade, [`SharecastService`], owns the shared resources (database,
//! configuration, HTTP client, job queue, event bus) and hands them to the
//! specialized sub-services, so the CLI, the worker daemon and the web
//! surface drive the same code:
//!
//! - `ProviderRegistry`: configured provider adapters, changed through the config pipeline
//! - `TokenService`: token lookup and refresh
//! - `AccountService`: OAuth connect flow and account management
//! - `ShareService`: composing, saving and publishing shares
//! - `PostsService`: importing recent platform posts
//! - `EventBus`: notifications about providers, shares and pulls
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use libsharecast::service::SharecastService;
//!
//! # async fn example() -> libsharecast::Result<()> {
//! let service = SharecastService::new().await?;
//!
//! let queued = service.shares().publish_shares_from_pending_entries(Utc::now(), false).await?;
//! println!("Queued {} share(s)", queued.len());
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod events;
pub mod posts;
pub mod registry;
pub mod shares;
pub mod tokens;

use chrono::Duration;
use std::sync::Arc;

use self::accounts::AccountService;
use self::events::EventBus;
use self::posts::PostsService;
use self::registry::ProviderRegistry;
use self::shares::ShareService;
use self::tokens::TokenService;
use crate::jobs::{JobQueue, SqliteJobQueue};
use crate::providers::{ProviderContext, ProviderFactory};
use crate::{http, Config, Database, Result};

/// Main service facade coordinating all sub-services
///
/// All sub-services share the same `Arc<Database>`, the same job queue and
/// the same event bus.
#[derive(Clone)]
pub struct SharecastService {
    db: Arc<Database>,
    config: Arc<Config>,
    queue: Arc<SqliteJobQueue>,
    registry: ProviderRegistry,
    tokens: TokenService,
    accounts: AccountService,
    shares: ShareService,
    posts: PostsService,
    event_bus: EventBus,
}

impl SharecastService {
    /// Create a service from the default configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the database
    /// cannot be opened or migrated.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service knowing the bundled platform adapters
    pub async fn from_config(config: Config) -> Result<Self> {
        let context = ProviderContext {
            http: http::build_client(&config.http)?,
            redirect_uri: config.server.redirect_uri()?,
        };
        Self::with_factory(config, ProviderFactory::with_builtin(context)).await
    }

    /// Create a service with a custom adapter factory
    ///
    /// Tests use this to register the mock provider next to (or instead of)
    /// the bundled adapters.
    pub async fn with_factory(config: Config, factory: ProviderFactory) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database.path).await?);
        let http = factory.context().http.clone();
        let event_bus = EventBus::new(100);

        let queue = Arc::new(SqliteJobQueue::new(
            &db,
            Duration::seconds(config.worker.lease_secs as i64),
            config.worker.max_attempts,
        ));

        let registry = ProviderRegistry::new(Arc::clone(&db), factory, event_bus.clone());
        let tokens = TokenService::new(Arc::clone(&db), registry.clone());
        let accounts = AccountService::new(
            Arc::clone(&db),
            registry.clone(),
            tokens.clone(),
            config.server.default_return_url.clone(),
        );
        let shares = ShareService::new(
            Arc::clone(&db),
            tokens.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            event_bus.clone(),
            http,
            Duration::seconds(config.worker.lease_secs as i64),
        );
        let posts = PostsService::new(Arc::clone(&db), tokens.clone(), event_bus.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            queue,
            registry,
            tokens,
            accounts,
            shares,
            posts,
            event_bus,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The durable queue publish jobs are enqueued to
    pub fn queue(&self) -> Arc<SqliteJobQueue> {
        Arc::clone(&self.queue)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn shares(&self) -> &ShareService {
        &self.shares
    }

    pub fn posts(&self) -> &PostsService {
        &self.posts
    }

    /// Subscribe to service events
    ///
    /// Multiple subscribers are supported; each sees every event emitted
    /// after it subscribed.
    pub fn subscribe(&self) -> events::EventReceiver {
        self.event_bus.subscribe()
    }
}
