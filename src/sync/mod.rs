//! Throttled traversal over guilds and their members.
//!
//! The engine walks a static queue of guilds and, within the active guild,
//! drains a pool of members. Every unit of work (loading a guild's member
//! pool, or updating one member) is gated on a fixed-period timer tick, so
//! the outbound call rate is bounded regardless of guild count or size.
//! The design separates:
//! - **State**: where the traversal stands (`TraversalState`)
//! - **Step**: what one tick does (`SyncEngine`)

pub mod engine;
pub mod state;

pub use engine::SyncEngine;
pub use state::{AccountId, GuildId, TraversalState};
