//! Startup bootstrap: wait for connectivity and create the database.

use std::time::Duration;

use sqlx::{Connection, PgConnection};

use sqlservice_core::{DbSettings, Dialect};

use crate::error::{ServiceError, ServiceResult};
use crate::query::quote_ident;

/// Connection attempts before startup is abandoned.
pub const CONNECT_ATTEMPTS: u32 = 20;

/// Fixed delay between attempts. Bounded retry, no backoff.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Postgres error code for a connection to a database that does not exist.
const INVALID_CATALOG_NAME: &str = "3D000";

/// Wait until the configured database accepts connections, creating it
/// through the maintenance database if it does not exist yet. Exhausting
/// the attempt budget is fatal.
pub async fn ensure_database(settings: &DbSettings) -> ServiceResult<()> {
    if settings.dialect != Dialect::Postgres {
        return Err(ServiceError::DriverNotFound {
            dialect: settings.dialect,
        });
    }

    for attempt in 1..=CONNECT_ATTEMPTS {
        match PgConnection::connect(&settings.url()).await {
            Ok(conn) => {
                if let Err(error) = conn.close().await {
                    tracing::debug!(%error, "probe connection close failed");
                }
                return Ok(());
            }
            Err(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(INVALID_CATALOG_NAME) =>
            {
                return create_database(settings).await;
            }
            Err(error) => {
                tracing::warn!(
                    attempt,
                    max = CONNECT_ATTEMPTS,
                    %error,
                    "database connection failed, retrying in {}s",
                    RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    Err(ServiceError::Startup {
        attempts: CONNECT_ATTEMPTS,
    })
}

async fn create_database(settings: &DbSettings) -> ServiceResult<()> {
    let mut conn = PgConnection::connect(&settings.maintenance_url()).await?;
    let statement = format!(
        "CREATE DATABASE {} OWNER {}",
        quote_ident(&settings.database)?,
        quote_ident(&settings.user)?
    );
    sqlx::query(&statement).execute(&mut conn).await?;
    conn.close().await?;
    tracing::info!(database = %settings.database, "database created");
    Ok(())
}
