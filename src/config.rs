use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Default deadline for each outbound update call, in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct Config {
    /// Base address of the backend that refreshes a member's roles.
    pub backend_url: String,
    pub backend_port: u16,
    pub database: DatabaseConfig,
    pub tables: TableNames,
    /// Pacing period: one unit of work (guild load or member update) per tick.
    pub tick_period: Duration,
    /// Deadline for each outbound update call, independent of the tick period.
    pub request_timeout: Duration,
    /// The guilds to process this run, in order.
    pub guilds_to_update: Vec<String>,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    /// TLS is required for any database host other than a local one.
    pub fn tls_required(&self) -> bool {
        requires_tls(&self.host)
    }
}

/// The three tables this process touches. Only `sync` and `sync_logs` are
/// written; `members` belongs to the bot that populates it.
#[derive(Clone)]
pub struct TableNames {
    pub members: String,
    pub sync: String,
    pub sync_logs: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let backend_url = env::var("STARRY_BACKEND")
            .context("STARRY_BACKEND environment variable is required")?;

        let backend_port = env::var("PORT")
            .context("PORT environment variable is required")?
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let database = DatabaseConfig {
            host: env::var("DB_HOSTIP").context("DB_HOSTIP environment variable is required")?,
            port: env::var("DB_HOSTPORT")
                .context("DB_HOSTPORT environment variable is required")?
                .parse::<u16>()
                .context("DB_HOSTPORT must be a valid port number")?,
            name: env::var("DB_NAME").context("DB_NAME environment variable is required")?,
            user: env::var("DB_USER").context("DB_USER environment variable is required")?,
            password: env::var("DB_PASS").context("DB_PASS environment variable is required")?,
        };

        let tables = TableNames {
            members: parse_table_name(
                env::var("DB_TABLENAME_MEMBERS")
                    .context("DB_TABLENAME_MEMBERS environment variable is required")?,
            )?,
            sync: parse_table_name(
                env::var("DB_TABLENAME_SYNC")
                    .context("DB_TABLENAME_SYNC environment variable is required")?,
            )?,
            sync_logs: parse_table_name(
                env::var("DB_TABLENAME_SYNC_LOGS")
                    .context("DB_TABLENAME_SYNC_LOGS environment variable is required")?,
            )?,
        };

        let tick_ms = env::var("TIMEOUT")
            .context("TIMEOUT environment variable is required")?
            .parse::<u64>()
            .context("TIMEOUT must be a number of milliseconds")?;

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_REQUEST_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .context("REQUEST_TIMEOUT_SECS must be a number of seconds")?;

        // An unset guild list gets the same usage hint as an empty one.
        let guilds_to_update = match env::var("GUILDS_TO_UPDATE") {
            Ok(raw) => parse_guild_list(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            backend_url,
            backend_port,
            database,
            tables,
            tick_period: Duration::from_millis(tick_ms),
            request_timeout: Duration::from_secs(request_timeout_secs),
            guilds_to_update,
        })
    }
}

/// Parse the GUILDS_TO_UPDATE literal: a JSON array of guild ID strings.
pub fn parse_guild_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .context("GUILDS_TO_UPDATE must be a JSON array of guild ID strings")
}

/// TLS is required unless the database host is local.
pub fn requires_tls(host: &str) -> bool {
    !matches!(host, "localhost" | "127.0.0.1")
}

/// Table names are interpolated into SQL statements, so they are restricted
/// to plain identifiers.
pub fn parse_table_name(name: String) -> Result<String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!("table name must be a plain identifier, got {:?}", name);
    }
    Ok(name)
}
