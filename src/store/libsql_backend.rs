//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Snowflake ids are stored as
//! TEXT so they survive any client that reads them as floating point.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::gateway::{ChannelId, MemberId, MessageId};
use crate::onboarding::session::{OnboardingSession, QuestionRef, SessionStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_id(s: &str) -> Result<u64, DatabaseError> {
    s.parse()
        .map_err(|e| DatabaseError::Serialization(format!("invalid snowflake {s:?}: {e}")))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const SESSION_COLUMNS: &str = "member_id, channel_id, step_index, status, question_message_id, question_posted_at, started_at, updated_at";

/// Map a libsql Row to an OnboardingSession.
fn row_to_session(row: &libsql::Row) -> Result<OnboardingSession, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("read session row: {e}"));

    let member_id: String = row.get(0).map_err(read)?;
    let channel_id: String = row.get(1).map_err(read)?;
    let step_index: i64 = row.get(2).map_err(read)?;
    let status_str: String = row.get(3).map_err(read)?;
    let question_message_id: Option<String> = row.get(4).ok();
    let question_posted_at: Option<String> = row.get(5).ok();
    let started_str: String = row.get(6).map_err(read)?;
    let updated_str: String = row.get(7).map_err(read)?;

    let status = SessionStatus::parse(&status_str).ok_or_else(|| {
        DatabaseError::Serialization(format!("unknown session status {status_str:?}"))
    })?;

    let question = match (question_message_id, question_posted_at) {
        (Some(id), Some(at)) => Some(QuestionRef {
            message_id: MessageId(parse_id(&id)?),
            posted_at: parse_datetime(&at),
        }),
        _ => None,
    };

    Ok(OnboardingSession {
        member_id: MemberId(parse_id(&member_id)?),
        channel_id: ChannelId(parse_id(&channel_id)?),
        step_index: usize::try_from(step_index).unwrap_or_default(),
        status,
        question,
        started_at: parse_datetime(&started_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Onboarding sessions ─────────────────────────────────────────

    async fn upsert_session(&self, session: &OnboardingSession) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO onboarding_sessions (member_id, channel_id, step_index, status,
                question_message_id, question_posted_at, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (member_id) DO UPDATE SET
                channel_id = ?2, step_index = ?3, status = ?4,
                question_message_id = ?5, question_posted_at = ?6,
                started_at = ?7, updated_at = ?8",
            params![
                session.member_id.to_string(),
                session.channel_id.to_string(),
                session.step_index as i64,
                session.status.as_str(),
                opt_text_owned(session.question.map(|q| q.message_id.to_string())),
                opt_text_owned(session.question.map(|q| q.posted_at.to_rfc3339())),
                session.started_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_session: {e}")))?;
        Ok(())
    }

    async fn get_session(
        &self,
        member_id: MemberId,
    ) -> Result<Option<OnboardingSession>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM onboarding_sessions WHERE member_id = ?1"),
                params![member_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn list_sessions(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<OnboardingSession>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM onboarding_sessions
                     WHERE status = ?1 ORDER BY started_at ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sessions: {e}")))?;

        let mut sessions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sessions: {e}")))?
        {
            sessions.push(row_to_session(&row)?);
        }
        Ok(sessions)
    }

    async fn record_question(
        &self,
        member_id: MemberId,
        step_index: usize,
        question: QuestionRef,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE onboarding_sessions
             SET step_index = ?2, question_message_id = ?3, question_posted_at = ?4, updated_at = ?5
             WHERE member_id = ?1",
            params![
                member_id.to_string(),
                step_index as i64,
                question.message_id.to_string(),
                question.posted_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_question: {e}")))?;
        Ok(())
    }

    async fn set_session_status(
        &self,
        member_id: MemberId,
        status: SessionStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "UPDATE onboarding_sessions SET status = ?2, updated_at = ?3 WHERE member_id = ?1",
                params![
                    member_id.to_string(),
                    status.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_session_status: {e}")))?;
        Ok(count > 0)
    }

    // ── Karma ───────────────────────────────────────────────────────

    async fn record_reputation(
        &self,
        from: MemberId,
        to: MemberId,
        message_id: MessageId,
        points: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "INSERT OR IGNORE INTO reputations (points, from_member, to_member, message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    points,
                    from.to_string(),
                    to.to_string(),
                    message_id.to_string(),
                    at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_reputation: {e}")))?;
        Ok(count > 0)
    }

    async fn reputation_total(&self, member_id: MemberId) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COALESCE(SUM(points), 0) FROM reputations WHERE to_member = ?1",
                params![member_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reputation_total: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn question(id: u64) -> QuestionRef {
        QuestionRef {
            message_id: MessageId(id),
            posted_at: Utc::now(),
        }
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_and_get_session() {
        let db = test_db().await;
        let session = OnboardingSession::new(MemberId(123), ChannelId(456));
        db.upsert_session(&session).await.unwrap();

        let fetched = db.get_session(MemberId(123)).await.unwrap().unwrap();
        assert_eq!(fetched.member_id, MemberId(123));
        assert_eq!(fetched.channel_id, ChannelId(456));
        assert_eq!(fetched.step_index, 0);
        assert_eq!(fetched.status, SessionStatus::Active);
        assert!(fetched.question.is_none());
    }

    #[tokio::test]
    async fn get_session_not_found() {
        let db = test_db().await;
        assert!(db.get_session(MemberId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn large_snowflakes_survive() {
        let db = test_db().await;
        let member = MemberId(u64::MAX - 7);
        db.upsert_session(&OnboardingSession::new(member, ChannelId(u64::MAX)))
            .await
            .unwrap();
        let fetched = db.get_session(member).await.unwrap().unwrap();
        assert_eq!(fetched.member_id, member);
        assert_eq!(fetched.channel_id, ChannelId(u64::MAX));
    }

    #[tokio::test]
    async fn record_question_moves_step() {
        let db = test_db().await;
        db.upsert_session(&OnboardingSession::new(MemberId(1), ChannelId(2)))
            .await
            .unwrap();

        let asked = question(99);
        db.record_question(MemberId(1), 3, asked).await.unwrap();

        let fetched = db.get_session(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(fetched.step_index, 3);
        let stored = fetched.question.unwrap();
        assert_eq!(stored.message_id, MessageId(99));
        assert_eq!(stored.posted_at.timestamp(), asked.posted_at.timestamp());
    }

    #[tokio::test]
    async fn rejoining_replaces_previous_session() {
        let db = test_db().await;
        db.upsert_session(&OnboardingSession::new(MemberId(1), ChannelId(2)))
            .await
            .unwrap();
        db.record_question(MemberId(1), 2, question(5)).await.unwrap();
        db.set_session_status(MemberId(1), SessionStatus::Abandoned)
            .await
            .unwrap();

        db.upsert_session(&OnboardingSession::new(MemberId(1), ChannelId(3)))
            .await
            .unwrap();
        let fetched = db.get_session(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(fetched.channel_id, ChannelId(3));
        assert_eq!(fetched.step_index, 0);
        assert!(fetched.question.is_none());
        assert!(fetched.is_active());
    }

    #[tokio::test]
    async fn list_sessions_by_status() {
        let db = test_db().await;
        for member in 1..=3 {
            db.upsert_session(&OnboardingSession::new(MemberId(member), ChannelId(member + 100)))
                .await
                .unwrap();
        }
        assert!(db
            .set_session_status(MemberId(2), SessionStatus::Completed)
            .await
            .unwrap());
        assert!(!db
            .set_session_status(MemberId(42), SessionStatus::Completed)
            .await
            .unwrap());

        let active = db.list_sessions(SessionStatus::Active).await.unwrap();
        assert_eq!(active.len(), 2);
        let completed = db.list_sessions(SessionStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].member_id, MemberId(2));
    }

    // ── Karma tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn reputation_is_counted_once_per_message() {
        let db = test_db().await;
        let now = Utc::now();

        assert!(db
            .record_reputation(MemberId(1), MemberId(2), MessageId(10), 1, now)
            .await
            .unwrap());
        assert!(!db
            .record_reputation(MemberId(1), MemberId(2), MessageId(10), 1, now)
            .await
            .unwrap());
        assert!(db
            .record_reputation(MemberId(3), MemberId(2), MessageId(10), 1, now)
            .await
            .unwrap());

        assert_eq!(db.reputation_total(MemberId(2)).await.unwrap(), 2);
        assert_eq!(db.reputation_total(MemberId(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn file_database_persists_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("sessions.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.upsert_session(&OnboardingSession::new(MemberId(7), ChannelId(8)))
                .await
                .unwrap();
        }
        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.get_session(MemberId(7)).await.unwrap().is_some());
    }
}
