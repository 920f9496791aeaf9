//! Completion — what happens once a member is past the last step.
//!
//! Every external call here is best-effort: failures are logged and the
//! remaining actions still run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::RoleConfig;
use crate::error::GatewayError;
use crate::gateway::{ChannelId, ChatGateway, MemberId, RoleId};
use crate::identity::AccountLinker;
use crate::marketing::{TagOutcome, TaggingService};
use crate::onboarding::catalog::WELCOME_DM;
use crate::onboarding::session::SessionStatus;
use crate::store::Database;

const ROLE_PERMISSION_HINT: &str = "This normally happens because the bot is missing the Manage Roles permission, or because the bot's role is lower than the granted role in the role list.";

/// What a completion run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    /// The session was already completed; only channel deletion was retried.
    pub already_completed: bool,
    pub pro_granted: bool,
    pub tagged: Option<TagOutcome>,
    pub regular_granted: bool,
    pub channel_deleted: bool,
    pub dm_sent: bool,
}

/// Grants roles, tags the member, removes the channel and says goodbye.
pub struct CompletionHandler {
    gateway: Arc<dyn ChatGateway>,
    store: Arc<dyn Database>,
    linker: Arc<AccountLinker>,
    tagging: Arc<dyn TaggingService>,
    roles: RoleConfig,
}

impl CompletionHandler {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: Arc<dyn Database>,
        linker: Arc<AccountLinker>,
        tagging: Arc<dyn TaggingService>,
        roles: RoleConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            linker,
            tagging,
            roles,
        }
    }

    /// Finish `member`'s onboarding. Safe to call again on a completed session.
    pub async fn complete(&self, member: MemberId, channel: ChannelId) -> CompletionReport {
        let mut report = CompletionReport::default();

        let status = match self.store.get_session(member).await {
            Ok(session) => session.map(|s| s.status),
            Err(e) => {
                warn!(member_id = %member, error = %e, "Failed to read session before completion");
                None
            }
        };

        if status == Some(SessionStatus::Completed) {
            report.already_completed = true;
            report.channel_deleted = self.delete_channel(member, channel).await;
            return report;
        }

        info!(member_id = %member, channel_id = %channel, "Completing onboarding");

        let account = self.linker.find_linked_account(member).await;

        if account.as_ref().is_some_and(|a| a.active_subscription) {
            report.pro_granted = self.grant_role(member, self.roles.pro, "pro").await;
        }

        match account.as_ref().and_then(|a| a.email.as_deref()) {
            Some(email) => match self.tagging.tag_member(email).await {
                Ok(outcome) => report.tagged = Some(outcome),
                Err(e) => error!(member_id = %member, error = %e, "Failed to tag member"),
            },
            None => warn!(member_id = %member, "No linked email to tag"),
        }

        report.regular_granted = self
            .grant_role(member, self.roles.regular_member, "regular member")
            .await;

        report.channel_deleted = self.delete_channel(member, channel).await;

        if let Err(e) = self
            .store
            .set_session_status(member, SessionStatus::Completed)
            .await
        {
            error!(member_id = %member, error = %e, "Failed to mark session completed");
        }

        match self.gateway.send_direct_message(member, WELCOME_DM).await {
            Ok(()) => report.dm_sent = true,
            Err(e) => warn!(member_id = %member, error = %e, "Failed to send welcome DM"),
        }

        info!(
            member_id = %member,
            pro = report.pro_granted,
            regular = report.regular_granted,
            "Onboarding complete"
        );
        report
    }

    async fn grant_role(&self, member: MemberId, role: RoleId, label: &str) -> bool {
        match self.gateway.add_role(member, role).await {
            Ok(()) => true,
            Err(e @ GatewayError::PermissionDenied { .. }) => {
                error!(member_id = %member, role = label, error = %e, hint = ROLE_PERMISSION_HINT, "Failed to grant role");
                false
            }
            Err(e) => {
                error!(member_id = %member, role = label, error = %e, "Failed to grant role");
                false
            }
        }
    }

    async fn delete_channel(&self, member: MemberId, channel: ChannelId) -> bool {
        match self.gateway.delete_channel(channel).await {
            Ok(()) => true,
            Err(e) => {
                warn!(member_id = %member, channel_id = %channel, error = %e, "Failed to delete onboarding channel");
                false
            }
        }
    }
}
