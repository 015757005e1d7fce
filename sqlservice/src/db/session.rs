//! Unit-of-work session over a pooled connection.

use std::sync::Arc;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

/// A session shared across one unit of work. Not for sharing across
/// concurrent units of work; each of those gets its own session.
pub type SharedSession = Arc<Mutex<Session>>;

/// One unit-of-work boundary wrapping a connection from the pool.
///
/// The transaction begins lazily at the first statement and a fresh one
/// replaces it after `commit`. Dropping the session rolls back anything
/// uncommitted and returns the connection, so error paths cannot leak
/// connections.
pub struct Session {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl Session {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Connection for the current transaction, beginning one if needed.
    pub async fn conn(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
            tracing::debug!("session transaction opened");
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => unreachable!("transaction opened above"),
        }
    }

    /// Commit the open transaction, if any. The next statement begins a
    /// new one.
    pub async fn commit(&mut self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            tracing::debug!("session committed");
        }
        Ok(())
    }

    /// Roll back the open transaction, if any. Failures are logged; the
    /// connection is reset on return to the pool either way.
    pub async fn rollback(&mut self) {
        if let Some(tx) = self.tx.take() {
            match tx.rollback().await {
                Ok(()) => tracing::debug!("session rolled back"),
                Err(error) => tracing::warn!(%error, "rollback failed"),
            }
        }
    }

    /// Whether a transaction is currently open.
    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}
