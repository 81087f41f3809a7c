//! Postgres implementation of `SyncStore`.
//!
//! Table names come from configuration, so statements interpolate the
//! (identifier-checked) names and bind every value as a parameter. The
//! begin-guild upsert is a single `INSERT ... ON CONFLICT` so that two
//! processes touching the same guild cannot race a check-then-act.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};

use super::{Result, SyncStore};
use crate::config::{DatabaseConfig, TableNames};
use crate::sync::state::{AccountId, GuildId};

pub struct PgSyncStore {
    pool: PgPool,
    tables: TableNames,
}

impl PgSyncStore {
    /// Connect a small fixed-size pool. TLS is required unless the host is
    /// local, per `DatabaseConfig::tls_required`.
    pub async fn connect(db: &DatabaseConfig, tables: TableNames) -> Result<Self> {
        let ssl_mode = if db.tls_required() {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        };

        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .database(&db.name)
            .username(&db.user)
            .password(&db.password)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .min_connections(5)
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(60))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await?;

        Ok(Self { pool, tables })
    }

    /// Create the sync bookkeeping tables if they do not exist. The members
    /// table belongs to the bot that populates it and is only read here.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                discord_guild_id TEXT PRIMARY KEY,
                began_update     TIMESTAMPTZ NOT NULL,
                finished_update  TIMESTAMPTZ NULL,
                times_updated    BIGINT NOT NULL DEFAULT 0
            )
            "#,
            self.tables.sync
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                discord_guild_id TEXT NOT NULL,
                members_updated  BIGINT NOT NULL
            )
            "#,
            self.tables.sync_logs
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn load_members(&self, guild: &GuildId) -> Result<Vec<AccountId>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT discord_account_id FROM {} \
             WHERE discord_guild_id = $1 AND cosmos_address IS NOT NULL",
            self.tables.members
        ))
        .bind(guild.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("discord_account_id")
                    .map(AccountId::from)
                    .map_err(Into::into)
            })
            .collect()
    }

    async fn begin_guild(&self, guild: &GuildId) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (discord_guild_id, began_update, finished_update) \
             VALUES ($1, now(), NULL) \
             ON CONFLICT (discord_guild_id) \
             DO UPDATE SET began_update = now(), finished_update = NULL",
            self.tables.sync
        ))
        .bind(guild.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_guild(&self, guild: &GuildId) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET finished_update = now(), times_updated = times_updated + 1 \
             WHERE discord_guild_id = $1",
            self.tables.sync
        ))
        .bind(guild.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_sync_log(&self, guild: &GuildId, member_count: usize) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (discord_guild_id, members_updated) VALUES ($1, $2)",
            self.tables.sync_logs
        ))
        .bind(guild.as_str())
        .bind(member_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
