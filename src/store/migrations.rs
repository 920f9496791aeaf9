//! Session schema migrations, tracked by version in `_migrations`.

use libsql::Connection;
use tracing::{debug, info};

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "onboarding_sessions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_sessions (
                member_id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                step_index INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                question_message_id TEXT,
                question_posted_at TEXT,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_onboarding_sessions_status
                ON onboarding_sessions(status);
            CREATE INDEX IF NOT EXISTS idx_onboarding_sessions_channel
                ON onboarding_sessions(channel_id);
        "#,
    },
    Migration {
        version: 2,
        name: "reputations",
        sql: r#"
            CREATE TABLE IF NOT EXISTS reputations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                points INTEGER NOT NULL,
                from_member TEXT NOT NULL,
                to_member TEXT NOT NULL,
                message_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (from_member, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_reputations_to ON reputations(to_member);
        "#,
    },
];

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn failed(context: String) -> impl FnOnce(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Apply every migration newer than the recorded schema version.
///
/// A migration and its `_migrations` row commit in one transaction.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(BOOKKEEPING, ())
        .await
        .map_err(failed("Failed to create _migrations table".into()))?;

    let applied = applied_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        debug!(version = applied, "Session schema up to date");
        return Ok(());
    }

    for migration in pending {
        let label = format!("Migration V{} ({})", migration.version, migration.name);
        info!(version = migration.version, name = migration.name, "Applying schema migration");

        let tx = conn
            .transaction()
            .await
            .map_err(failed(format!("{label} could not start")))?;
        tx.execute_batch(migration.sql)
            .await
            .map_err(failed(format!("{label} failed")))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(failed(format!("{label} could not be recorded")))?;
        tx.commit()
            .await
            .map_err(failed(format!("{label} could not commit")))?;
    }

    let version = applied_version(conn).await?;
    info!(version, "Session schema migrated");
    Ok(())
}

/// Highest recorded migration version; 0 on a fresh database.
async fn applied_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(failed("Failed to query schema version".into()))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(failed("Failed to read schema version".into()))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(failed("Failed to parse schema version".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["onboarding_sessions", "reputations", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = applied_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn only_newer_migrations_run() {
        let conn = test_conn().await;
        conn.execute(BOOKKEEPING, ()).await.unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (1, 'onboarding_sessions')",
            (),
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();
        assert_eq!(applied_version(&conn).await.unwrap(), 2);
    }
}
