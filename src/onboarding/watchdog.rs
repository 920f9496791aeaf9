//! Watchdog — nudges, warns and finally removes members who stall on a step.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::error::{Error, OnboardingError, Result};
use crate::gateway::{ChannelRef, MemberId, OutgoingMessage};

use super::catalog::idle_warning;
use super::history::format_error;
use super::sequencer::StepSequencer;

/// Escalation tier for a stalled member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    OfferHelp,
    Warn,
    Kick,
}

/// The highest tier that applies after `elapsed` on one question.
pub fn escalation_for(
    elapsed: Duration,
    step_has_help: bool,
    config: &WatchdogConfig,
) -> Option<Escalation> {
    if elapsed >= config.kick_after {
        Some(Escalation::Kick)
    } else if elapsed >= config.warn_after {
        Some(Escalation::Warn)
    } else if elapsed >= config.help_after && step_has_help {
        Some(Escalation::OfferHelp)
    } else {
        None
    }
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub inspected: usize,
    pub help_offered: usize,
    pub warned: usize,
    pub kicked: Vec<MemberId>,
}

pub struct Watchdog {
    sequencer: Arc<StepSequencer>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(sequencer: Arc<StepSequencer>, config: WatchdogConfig) -> Self {
        Self { sequencer, config }
    }

    /// Inspect every onboarding channel as of now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Inspect every onboarding channel as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let channels = match self.sequencer.deps().gateway.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, "Watchdog failed to list channels");
                return report;
            }
        };

        let owned: Vec<(ChannelRef, MemberId)> = channels
            .into_iter()
            .filter_map(|c| self.sequencer.owner_of(&c.name).map(|member| (c, member)))
            .collect();
        report.inspected = owned.len();

        // Members are independent; each inspection takes its own member's lock.
        let outcomes = join_all(
            owned
                .iter()
                .map(|(channel, member)| self.inspect(channel, *member, now)),
        )
        .await;

        for ((channel, member), outcome) in owned.iter().zip(outcomes) {
            match outcome {
                Ok(Some(Escalation::OfferHelp)) => report.help_offered += 1,
                Ok(Some(Escalation::Warn)) => report.warned += 1,
                Ok(Some(Escalation::Kick)) => report.kicked.push(*member),
                Ok(None) => {}
                Err(Error::Onboarding(e @ OnboardingError::SessionClosed { .. })) => {
                    debug!(channel = %channel.name, error = %e, "Skipping closed onboarding channel")
                }
                Err(e) => {
                    warn!(channel = %channel.name, error = %e, "Watchdog failed to inspect channel")
                }
            }
        }

        report
    }

    /// Apply the tier due in one channel. Returns the tier acted on, if any.
    async fn inspect(
        &self,
        channel: &ChannelRef,
        member: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Option<Escalation>> {
        let gateway = &self.sequencer.deps().gateway;
        let _guard = self.sequencer.registry().acquire(member).await;

        let current = self
            .sequencer
            .locate_current_step(member, channel.id)
            .await?;
        let step = self.sequencer.step(current.index)?;
        let elapsed = (now - current.question.posted_at)
            .to_std()
            .unwrap_or_default();

        let (tier, text) = match escalation_for(elapsed, step.help.is_some(), &self.config) {
            None => return Ok(None),
            Some(Escalation::Kick) => {
                if gateway.fetch_member(member).await?.is_none() {
                    // Already gone; removal cleanup owns the channel.
                    return Ok(None);
                }
                info!(member_id = %member, channel_id = %channel.id, elapsed_secs = elapsed.as_secs(), "Removing stalled member");
                gateway.kick_member(member).await?;
                return Ok(Some(Escalation::Kick));
            }
            Some(Escalation::Warn) => (
                Escalation::Warn,
                format_error(member, &idle_warning(self.sequencer.config().help_contact)),
            ),
            Some(Escalation::OfferHelp) => (
                Escalation::OfferHelp,
                format_error(member, step.help.as_deref().unwrap_or_default()),
            ),
        };

        let history = gateway
            .recent_messages(channel.id, self.sequencer.config().history_limit)
            .await?;
        let already_posted = history
            .iter()
            .filter(|m| m.id > current.question.message_id)
            .any(|m| m.content == text);
        if already_posted {
            return Ok(None);
        }

        gateway
            .send_message(channel.id, OutgoingMessage::text(text))
            .await?;
        debug!(member_id = %member, tier = ?tier, "Watchdog notice posted");
        Ok(Some(tier))
    }
}

/// Spawn the periodic watchdog sweep.
pub fn spawn_watchdog(watchdog: Arc<Watchdog>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = watchdog.config.interval.as_secs(),
            "Onboarding watchdog started"
        );
        let mut tick = tokio::time::interval(watchdog.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let report = watchdog.sweep().await;
                    if !report.kicked.is_empty() || report.warned > 0 || report.help_offered > 0 {
                        debug!(?report, "Watchdog sweep");
                    }
                }
            }
        }
        info!("Onboarding watchdog stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn tiers_escalate_with_time() {
        let config = WatchdogConfig::default();
        assert_eq!(escalation_for(secs(29), true, &config), None);
        assert_eq!(
            escalation_for(secs(30), true, &config),
            Some(Escalation::OfferHelp)
        );
        assert_eq!(
            escalation_for(secs(359), true, &config),
            Some(Escalation::OfferHelp)
        );
        assert_eq!(escalation_for(secs(360), true, &config), Some(Escalation::Warn));
        assert_eq!(escalation_for(secs(539), false, &config), Some(Escalation::Warn));
        assert_eq!(escalation_for(secs(540), true, &config), Some(Escalation::Kick));
        assert_eq!(escalation_for(secs(3600), false, &config), Some(Escalation::Kick));
    }

    #[test]
    fn help_needs_help_text() {
        let config = WatchdogConfig::default();
        assert_eq!(escalation_for(secs(31), false, &config), None);
    }
}
