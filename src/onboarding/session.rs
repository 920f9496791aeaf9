//! Onboarding sessions — one persisted record per member, plus the channel
//! naming convention that ties a channel back to its member.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gateway::{ChannelId, MemberId, MessageId};

/// Trailing `_<member id>` of an onboarding channel name.
static MEMBER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([^_]+)$").expect("member suffix regex is valid"));

/// Name of the onboarding channel for a member: `prefix + username + "_" + id`.
pub fn channel_name(prefix: &str, username: &str, member: MemberId) -> String {
    format!("{prefix}{username}_{member}")
}

/// Recover the member id encoded in an onboarding channel name.
///
/// Returns `None` for channels that don't carry the prefix or whose suffix
/// isn't a numeric id.
pub fn member_id_from_channel_name(prefix: &str, name: &str) -> Option<MemberId> {
    if !name.starts_with(prefix) {
        return None;
    }
    let captures = MEMBER_SUFFIX.captures(name)?;
    captures[1].parse().ok().map(MemberId)
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    /// The member left or was removed before finishing.
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The bot message that asked the current step's question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRef {
    pub message_id: MessageId,
    pub posted_at: DateTime<Utc>,
}

/// Persisted progress of one member through the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingSession {
    pub member_id: MemberId,
    pub channel_id: ChannelId,
    pub step_index: usize,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionRef>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingSession {
    /// A fresh session; no question has been posted yet.
    pub fn new(member_id: MemberId, channel_id: ChannelId) -> Self {
        let now = Utc::now();
        Self {
            member_id,
            channel_id,
            step_index: 0,
            status: SessionStatus::Active,
            question: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "👋welcome-";

    #[test]
    fn channel_name_round_trips_member_id() {
        let name = channel_name(PREFIX, "alice", MemberId(123));
        assert_eq!(name, "👋welcome-alice_123");
        assert_eq!(member_id_from_channel_name(PREFIX, &name), Some(MemberId(123)));
    }

    #[test]
    fn underscores_in_username_use_last_segment() {
        let name = channel_name(PREFIX, "al_ice_dev", MemberId(987654321));
        assert_eq!(
            member_id_from_channel_name(PREFIX, &name),
            Some(MemberId(987654321))
        );
    }

    #[test]
    fn foreign_channels_are_ignored() {
        assert_eq!(member_id_from_channel_name(PREFIX, "general"), None);
        assert_eq!(member_id_from_channel_name(PREFIX, "random_123"), None);
        assert_eq!(member_id_from_channel_name(PREFIX, "👋welcome-bob"), None);
        assert_eq!(member_id_from_channel_name(PREFIX, "👋welcome-bob_xyz"), None);
    }

    #[test]
    fn status_strings_match_serde() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Abandoned,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }

    #[test]
    fn new_session_starts_at_step_zero() {
        let session = OnboardingSession::new(MemberId(1), ChannelId(2));
        assert_eq!(session.step_index, 0);
        assert!(session.is_active());
        assert!(session.question.is_none());
    }
}
