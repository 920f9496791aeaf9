//! Marketing tags — marks onboarded members in the mailing-list service.

pub mod convertkit;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TaggingError;

pub use convertkit::ConvertKitClient;

/// What tagging did with an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOutcome {
    /// An existing subscriber was tagged.
    Tagged,
    /// The address was new and got subscribed through the signup form.
    Subscribed,
}

/// Subscriber tagging in the mailing-list service.
#[async_trait]
pub trait TaggingService: Send + Sync {
    /// Tag `email` if it is already a subscriber, otherwise subscribe it.
    async fn tag_member(&self, email: &str) -> Result<TagOutcome, TaggingError>;
}
