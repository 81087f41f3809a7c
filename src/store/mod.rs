//! Persistence seam for sync progress bookkeeping and member lookup.
//!
//! `SyncStore` abstracts the relational backend: the per-guild sync
//! lifecycle rows, the append-only run summaries, and the read-only member
//! query. Implementations provide different backends (Postgres for
//! production, in-memory for tests).

mod memory;
mod postgres;

pub use memory::MemorySyncStore;
pub use postgres::PgSyncStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::sync::state::{AccountId, GuildId};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the storage backend. These are fatal to a run: the progress
/// rows feed the `times_updated` accounting of future runs, so a failed
/// write cannot be skipped over.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }
}

/// Per-guild sync lifecycle row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub began_update: DateTime<Utc>,
    /// Set when the guild's last pass completed; cleared when a new pass
    /// begins.
    pub finished_update: Option<DateTime<Utc>>,
    /// Completed passes across all runs, ever.
    pub times_updated: i64,
}

/// One immutable run summary row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub guild_id: GuildId,
    pub members_updated: usize,
}

/// Storage operations the traversal engine depends on.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// The distinct members of the guild that have a linked address, by
    /// account ID. Called once per guild per run, the first time the guild
    /// is visited. The result is an unordered pool.
    async fn load_members(&self, guild: &GuildId) -> Result<Vec<AccountId>>;

    /// Record that a sync pass over the guild has begun (upsert): a fresh
    /// row starts with a zero pass counter, an existing row keeps its
    /// counter and has its finished timestamp cleared.
    async fn begin_guild(&self, guild: &GuildId) -> Result<()>;

    /// Record that the guild's pass finished and bump its pass counter.
    async fn finish_guild(&self, guild: &GuildId) -> Result<()>;

    /// Append one run summary row for the guild.
    async fn append_sync_log(&self, guild: &GuildId, member_count: usize) -> Result<()>;
}
