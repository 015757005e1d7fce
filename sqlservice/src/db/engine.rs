//! Engine construction and session checkout.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use sqlservice_core::{DbSettings, Dialect};

use crate::db::session::{Session, SharedSession};
use crate::error::{ServiceError, ServiceResult};

/// Maximum connections in the pool. The pool enforces this as a hard cap
/// with no overflow; acquiring past it waits for a release.
pub const POOL_SIZE: u32 = 5;

/// Owner of the connection pool; produces scoped sessions.
#[derive(Clone, Debug)]
pub struct Engine {
    pool: PgPool,
}

impl Engine {
    /// Connect to an explicit database URL.
    pub async fn connect(database_url: &str) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Resolve settings from the environment provider chain and connect.
    ///
    /// Loads `.env` first; no valid provider is fatal. The driver is
    /// selected here, once, from the resolved dialect.
    pub async fn from_env() -> ServiceResult<Self> {
        sqlservice_core::load_dotenv();
        let settings = sqlservice_core::resolve()?;
        Self::from_settings(&settings).await
    }

    /// Connect using already-resolved settings.
    pub async fn from_settings(settings: &DbSettings) -> ServiceResult<Self> {
        match settings.dialect {
            Dialect::Postgres => Self::connect(&settings.url()).await,
            dialect => Err(ServiceError::DriverNotFound { dialect }),
        }
    }

    /// Open a session over this engine's pool.
    ///
    /// The session checks its connection out lazily, at the first
    /// statement; pool exhaustion makes that statement wait.
    pub fn open(&self) -> Session {
        Session::new(self.pool.clone())
    }

    /// Open a session wrapped for sharing across one unit of work.
    pub fn open_shared(&self) -> SharedSession {
        SharedSession::new(tokio::sync::Mutex::new(self.open()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -p sqlservice -- --ignored

    #[tokio::test]
    #[ignore = "requires database"]
    async fn engine_acquires_connection() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let engine = Engine::connect(&url).await.expect("pool creation failed");

        let result: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(engine.pool())
            .await
            .expect("query failed");

        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn sessions_read_through_their_own_transaction() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let engine = Engine::connect(&url).await.expect("pool creation failed");

        let mut session = engine.open();
        let conn = session.conn().await.expect("conn");
        let result: (i32,) = sqlx::query_as("SELECT 2")
            .fetch_one(conn)
            .await
            .expect("query failed");
        assert_eq!(result.0, 2);
        session.rollback().await;
    }
}
