//! Startup recovery — reconcile onboarding channels with sessions after a restart.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::Result;
use crate::gateway::{ChannelId, ChannelRef, MemberId};

use super::sequencer::StepSequencer;
use super::session::SessionStatus;

/// What recovery did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub channels_seen: usize,
    /// Channels whose member left while the bot was offline.
    pub orphans_removed: usize,
    /// Immediate steps processed again, re-arming lost polls.
    pub steps_resumed: usize,
    /// Active sessions whose channel no longer exists.
    pub sessions_abandoned: usize,
}

/// Resume or clean up every onboarding channel.
pub async fn recover(sequencer: &Arc<StepSequencer>) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let gateway = &sequencer.deps().gateway;
    let store = &sequencer.deps().store;

    let channels: Vec<ChannelRef> = gateway.list_channels().await?;
    let mut live: HashSet<ChannelId> = HashSet::new();

    for channel in &channels {
        let Some(member) = sequencer.owner_of(&channel.name) else {
            continue;
        };
        report.channels_seen += 1;
        live.insert(channel.id);

        match gateway.fetch_member(member).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(member_id = %member, channel = %channel.name, "Member left while offline");
                if let Err(e) = sequencer.member_left(member).await {
                    warn!(member_id = %member, error = %e, "Failed to clean up orphaned channel");
                } else {
                    report.orphans_removed += 1;
                }
                continue;
            }
            Err(e) => {
                warn!(member_id = %member, error = %e, "Failed to fetch member during recovery");
                continue;
            }
        }

        match resume(sequencer, member, channel.id).await {
            Ok(true) => report.steps_resumed += 1,
            Ok(false) => {}
            Err(e) => {
                error!(member_id = %member, channel = %channel.name, error = %e, "Failed to resume onboarding")
            }
        }
    }

    for session in store.list_sessions(SessionStatus::Active).await? {
        if live.contains(&session.channel_id) {
            continue;
        }
        store
            .set_session_status(session.member_id, SessionStatus::Abandoned)
            .await?;
        report.sessions_abandoned += 1;
    }

    info!(
        channels = report.channels_seen,
        orphans = report.orphans_removed,
        resumed = report.steps_resumed,
        abandoned = report.sessions_abandoned,
        "Onboarding recovery complete"
    );
    Ok(report)
}

/// Re-run an immediately processed step. Returns whether one was resumed.
async fn resume(sequencer: &Arc<StepSequencer>, member: MemberId, channel: ChannelId) -> Result<bool> {
    let _guard = sequencer.registry().acquire(member).await;
    let current = sequencer.locate_current_step(member, channel).await?;
    if !sequencer.step(current.index)?.process_immediately() {
        return Ok(false);
    }
    sequencer
        .submit_answer(current.index, channel, member, "")
        .await?;
    Ok(true)
}
