//! Best-effort reporting of sync lifecycle events.
//!
//! Reporting can neither fail nor block the traversal: implementations emit
//! and return. The level policy for update outcomes follows the backend's
//! contract: 200 bodies are informational, everything else is an error
//! event (but still leaves the member counted as processed).

use tracing::{error, info};

use crate::sync::state::{AccountId, GuildId};
use crate::updater::UpdateOutcome;

pub trait SyncReporter: Send + Sync {
    fn run_started(&self, guild_count: usize);
    fn guild_started(&self, guild: &GuildId, member_count: usize);
    fn member_syncing(&self, guild: &GuildId, member: &AccountId);
    fn member_updated(&self, guild: &GuildId, member: &AccountId, outcome: &UpdateOutcome);
    fn guild_finished(&self, guild: &GuildId, member_count: usize, is_last: bool);
}

/// Emits lifecycle events as structured tracing events.
pub struct TracingReporter;

impl SyncReporter for TracingReporter {
    fn run_started(&self, guild_count: usize) {
        info!(guild_count, "beginning guild sync run");
    }

    fn guild_started(&self, guild: &GuildId, member_count: usize) {
        info!(guild_id = %guild, member_count, "beginning update for guild");
    }

    fn member_syncing(&self, guild: &GuildId, member: &AccountId) {
        info!(guild_id = %guild, account_id = %member, "calling token rule info");
    }

    fn member_updated(&self, guild: &GuildId, member: &AccountId, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Success { body } => {
                info!(
                    guild_id = %guild,
                    account_id = %member,
                    response = %body,
                    "token rule info refreshed"
                );
            }
            UpdateOutcome::Rejected => {
                error!(
                    guild_id = %guild,
                    account_id = %member,
                    status = 400u16,
                    "member update rejected"
                );
            }
            // Status only: an unexpected status describes the backend, not
            // the member.
            UpdateOutcome::Unexpected { status } => {
                error!(status = *status, "unexpected status from token rule info");
            }
            UpdateOutcome::Transport { error } => {
                error!(error = %error, "failure updating guild member");
            }
        }
    }

    fn guild_finished(&self, guild: &GuildId, member_count: usize, is_last: bool) {
        if is_last {
            info!(guild_id = %guild, member_count, "finished updating the final guild");
        } else {
            info!(guild_id = %guild, member_count, "finished updating guild");
        }
    }
}
