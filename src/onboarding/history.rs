//! Reading the current step back out of a channel's history.
//!
//! Bot messages carrying a marker (errors, notices, success messages) are not
//! questions. The newest unmarked bot message is the current question and
//! must equal one catalog question exactly.

use crate::error::OnboardingError;
use crate::gateway::{ChannelId, HistoryMessage, MemberId};

use super::catalog::StepCatalog;

/// Prefix of messages telling the member something went wrong.
pub const ERROR_MARKER: &str = "❌";

/// Prefix of informational bot messages.
pub const INFO_MARKER: &str = "ℹ️";

/// Wrap `text` as an error addressed to `member`.
pub fn format_error(member: MemberId, text: &str) -> String {
    format!("{ERROR_MARKER} <@{member}>, {text}")
}

/// Mark `text` as informational.
pub fn format_info(text: &str) -> String {
    format!("{INFO_MARKER} {text}")
}

pub fn is_system_message(content: &str) -> bool {
    content.contains(ERROR_MARKER) || content.contains(INFO_MARKER)
}

/// Find the current step in `history` (newest first).
///
/// Returns the step index and the question message.
pub fn derive_current_step<'a>(
    channel: ChannelId,
    history: &'a [HistoryMessage],
    bot_id: MemberId,
    catalog: &StepCatalog,
) -> Result<(usize, &'a HistoryMessage), OnboardingError> {
    let latest = history
        .iter()
        .filter(|m| m.author == bot_id)
        .find(|m| !is_system_message(&m.content));

    let Some(question) = latest else {
        return Err(OnboardingError::NoMatchingStep {
            channel: channel.to_string(),
            question: String::new(),
        });
    };

    catalog
        .find_by_question(&question.content)
        .map(|index| (index, question))
        .ok_or_else(|| OnboardingError::NoMatchingStep {
            channel: channel.to_string(),
            question: question.content.clone(),
        })
}
