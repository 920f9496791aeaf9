//! `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::gateway::{MemberId, MessageId};
use crate::onboarding::session::{OnboardingSession, QuestionRef, SessionStatus};

/// Backend-agnostic database trait covering onboarding sessions and karma.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Onboarding sessions ─────────────────────────────────────────

    /// Insert a session, replacing any previous session of the same member.
    async fn upsert_session(&self, session: &OnboardingSession) -> Result<(), DatabaseError>;

    /// Get a member's session, whatever its status.
    async fn get_session(
        &self,
        member_id: MemberId,
    ) -> Result<Option<OnboardingSession>, DatabaseError>;

    /// List sessions with the given status, oldest first.
    async fn list_sessions(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<OnboardingSession>, DatabaseError>;

    /// Record that `step_index` was asked by `question`. Single-statement update.
    async fn record_question(
        &self,
        member_id: MemberId,
        step_index: usize,
        question: QuestionRef,
    ) -> Result<(), DatabaseError>;

    /// Change a session's status. Returns false when the member has no session.
    async fn set_session_status(
        &self,
        member_id: MemberId,
        status: SessionStatus,
    ) -> Result<bool, DatabaseError>;

    // ── Karma ───────────────────────────────────────────────────────

    /// Record reputation points from one member to another for a message.
    ///
    /// Returns false if `from` already rewarded this message.
    async fn record_reputation(
        &self,
        from: MemberId,
        to: MemberId,
        message_id: MessageId,
        points: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Total reputation received by a member.
    async fn reputation_total(&self, member_id: MemberId) -> Result<i64, DatabaseError>;
}
