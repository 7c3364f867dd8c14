//! # triage-db
//!
//! Persistence layer for capture triage.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for captures, preference entries and typed entities
//! - An in-process [`MemoryStore`] implementing the same traits
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_db::Database;
//! use triage_core::{Capture, CaptureRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/triage").await?;
//!     db.captures.insert(&Capture::new("明天下午3点开会")).await?;
//!     Ok(())
//! }
//! ```

pub mod captures;
pub mod entities;
pub mod memory;
pub mod pool;
pub mod preferences;

pub use captures::PgCaptureRepository;
pub use entities::PgEntityRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use preferences::PgPreferenceRepository;

#[cfg(feature = "migrations")]
use triage_core::Error;
use triage_core::Result;

/// Combined database access with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub captures: PgCaptureRepository,
    pub preferences: PgPreferenceRepository,
    /// Calendar events, todos and notes.
    pub entities: PgEntityRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            captures: PgCaptureRepository::new(pool.clone()),
            preferences: PgPreferenceRepository::new(pool.clone()),
            entities: PgEntityRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
