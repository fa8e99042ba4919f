//! Database migrations.
//!
//! Uses SQLx embedded migrations for the local SQLite store.

use sqlx::migrate::MigrateError;
use sqlx::SqlitePool;

static SQLITE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

pub async fn run_sqlite(pool: &SqlitePool) -> Result<(), MigrateError> {
    SQLITE_MIGRATOR.run(pool).await
}
