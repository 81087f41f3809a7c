//! In-memory implementation of `SyncStore`.
//!
//! Backs the engine tests. Nothing survives the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Result, SyncLogEntry, SyncRecord, SyncStore};
use crate::sync::state::{AccountId, GuildId};

#[derive(Default)]
pub struct MemorySyncStore {
    members: RwLock<HashMap<GuildId, Vec<AccountId>>>,
    records: RwLock<HashMap<GuildId, SyncRecord>>,
    sync_log: RwLock<Vec<SyncLogEntry>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the member pool for a guild.
    pub async fn seed_members(&self, guild: GuildId, members: Vec<AccountId>) {
        self.members.write().await.insert(guild, members);
    }

    pub async fn record(&self, guild: &GuildId) -> Option<SyncRecord> {
        self.records.read().await.get(guild).cloned()
    }

    pub async fn log_entries(&self) -> Vec<SyncLogEntry> {
        self.sync_log.read().await.clone()
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn load_members(&self, guild: &GuildId) -> Result<Vec<AccountId>> {
        Ok(self
            .members
            .read()
            .await
            .get(guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn begin_guild(&self, guild: &GuildId) -> Result<()> {
        let now = Utc::now();
        self.records
            .write()
            .await
            .entry(guild.clone())
            .and_modify(|record| {
                record.began_update = now;
                record.finished_update = None;
            })
            .or_insert(SyncRecord {
                began_update: now,
                finished_update: None,
                times_updated: 0,
            });
        Ok(())
    }

    async fn finish_guild(&self, guild: &GuildId) -> Result<()> {
        // Mirrors an UPDATE that matches no rows: a missing record is left
        // missing.
        if let Some(record) = self.records.write().await.get_mut(guild) {
            record.finished_update = Some(Utc::now());
            record.times_updated += 1;
        }
        Ok(())
    }

    async fn append_sync_log(&self, guild: &GuildId, member_count: usize) -> Result<()> {
        self.sync_log.write().await.push(SyncLogEntry {
            guild_id: guild.clone(),
            members_updated: member_count,
        });
        Ok(())
    }
}
