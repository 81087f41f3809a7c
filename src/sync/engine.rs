//! The timer-paced traversal engine.
//!
//! One tick, one unit of work: either load the active guild's member pool
//! (its first visit) or update a single member. A tick whose work empties
//! the pool also finalizes the guild's bookkeeping and advances the queue.
//! The loop owns the timer and fully awaits each step before asking for the
//! next tick, so at most one unit of work is ever in flight.
//!
//! Per-member failures are absorbed at the updater boundary and reported;
//! storage errors propagate and abort the run.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::state::{GuildId, TraversalState};
use crate::reporter::SyncReporter;
use crate::store::{self, SyncStore};
use crate::updater::MemberUpdater;

pub struct SyncEngine {
    /// Guilds not yet started, consumed front-first.
    queue: VecDeque<GuildId>,
    state: TraversalState,
    store: Arc<dyn SyncStore>,
    updater: Arc<dyn MemberUpdater>,
    reporter: Arc<dyn SyncReporter>,
    tick_period: Duration,
}

impl SyncEngine {
    pub fn new(
        guilds: Vec<GuildId>,
        store: Arc<dyn SyncStore>,
        updater: Arc<dyn MemberUpdater>,
        reporter: Arc<dyn SyncReporter>,
        tick_period: Duration,
    ) -> Self {
        let mut queue: VecDeque<GuildId> = guilds.into();
        let state = match queue.pop_front() {
            Some(guild) => TraversalState::GuildStart { guild },
            None => TraversalState::Terminal,
        };

        Self {
            queue,
            state,
            store,
            updater,
            reporter,
            tick_period,
        }
    }

    /// Drive the traversal to completion. Returns once every guild has been
    /// processed, or with the first storage error. With nothing queued, no
    /// records are written at all.
    pub async fn run(&mut self) -> store::Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        self.reporter.run_started(self.queue.len() + 1);

        let mut ticker = interval_at(Instant::now() + self.tick_period, self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.state.is_terminal() {
            ticker.tick().await;
            self.step().await?;
        }

        Ok(())
    }

    /// Perform one tick's unit of work.
    async fn step(&mut self) -> store::Result<()> {
        match std::mem::replace(&mut self.state, TraversalState::Terminal) {
            TraversalState::GuildStart { guild } => self.start_guild(guild).await,

            TraversalState::MemberStep {
                guild,
                mut pool,
                expected_total,
            } => {
                // The pool is non-empty by construction: an emptied pool is
                // drained before the engine rests in MemberStep.
                if let Some(member) = pool.pop() {
                    self.reporter.member_syncing(&guild, &member);
                    let outcome = self.updater.update(&guild, &member).await;
                    self.reporter.member_updated(&guild, &member, &outcome);
                }

                if pool.is_empty() {
                    self.drain_guild(guild, expected_total).await
                } else {
                    self.state = TraversalState::MemberStep {
                        guild,
                        pool,
                        expected_total,
                    };
                    Ok(())
                }
            }

            // GuildDrain never rests between ticks, and Terminal ends the
            // loop before another step.
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// First visit to a guild: load its member pool, capture the expected
    /// total, and mark the pass begun. An empty pool drains immediately.
    async fn start_guild(&mut self, guild: GuildId) -> store::Result<()> {
        let pool = self.store.load_members(&guild).await?;
        let expected_total = pool.len();

        self.store.begin_guild(&guild).await?;
        self.reporter.guild_started(&guild, expected_total);

        if pool.is_empty() {
            self.drain_guild(guild, expected_total).await
        } else {
            self.state = TraversalState::MemberStep {
                guild,
                pool,
                expected_total,
            };
            Ok(())
        }
    }

    /// Finalize an emptied guild and advance: finish its record, append its
    /// run summary, and move to the next guild or terminate.
    async fn drain_guild(&mut self, guild: GuildId, expected_total: usize) -> store::Result<()> {
        self.state = TraversalState::GuildDrain {
            guild: guild.clone(),
            expected_total,
        };

        self.store.finish_guild(&guild).await?;

        match self.queue.pop_front() {
            Some(next) => {
                self.reporter.guild_finished(&guild, expected_total, false);
                self.store.append_sync_log(&guild, expected_total).await?;
                self.state = TraversalState::GuildStart { guild: next };
            }
            None => {
                self.reporter.guild_finished(&guild, expected_total, true);
                self.store.append_sync_log(&guild, expected_total).await?;
                self.state = TraversalState::Terminal;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::Value;

    use super::*;
    use crate::reporter::TracingReporter;
    use crate::store::{MemorySyncStore, Result as StoreResult, StoreError, SyncStore};
    use crate::sync::state::AccountId;
    use crate::updater::UpdateOutcome;

    /// Updater double that records every call and replays scripted outcomes
    /// (default: success with a null body).
    struct ScriptedUpdater {
        outcomes: HashMap<AccountId, UpdateOutcome>,
        calls: Mutex<Vec<(GuildId, AccountId)>>,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl ScriptedUpdater {
        fn ok() -> Self {
            Self {
                outcomes: HashMap::new(),
                calls: Mutex::new(Vec::new()),
                journal: None,
            }
        }

        fn with_outcome(mut self, member: &str, outcome: UpdateOutcome) -> Self {
            self.outcomes.insert(AccountId::from(member), outcome);
            self
        }

        fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
            self.journal = Some(journal);
            self
        }

        fn calls(&self) -> Vec<(GuildId, AccountId)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl crate::updater::MemberUpdater for ScriptedUpdater {
        async fn update(&self, guild: &GuildId, member: &AccountId) -> UpdateOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((guild.clone(), member.clone()));
            if let Some(journal) = &self.journal {
                journal
                    .lock()
                    .unwrap()
                    .push(format!("process({guild},{member})"));
            }
            self.outcomes
                .get(member)
                .cloned()
                .unwrap_or(UpdateOutcome::Success { body: Value::Null })
        }
    }

    /// Store double that appends a marker per write to a shared journal, for
    /// asserting the order of bookkeeping relative to member processing.
    struct JournalingStore {
        inner: MemorySyncStore,
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SyncStore for JournalingStore {
        async fn load_members(&self, guild: &GuildId) -> StoreResult<Vec<AccountId>> {
            self.inner.load_members(guild).await
        }

        async fn begin_guild(&self, guild: &GuildId) -> StoreResult<()> {
            self.journal.lock().unwrap().push(format!("begin({guild})"));
            self.inner.begin_guild(guild).await
        }

        async fn finish_guild(&self, guild: &GuildId) -> StoreResult<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("finish({guild})"));
            self.inner.finish_guild(guild).await
        }

        async fn append_sync_log(&self, guild: &GuildId, member_count: usize) -> StoreResult<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("log({guild},{member_count})"));
            self.inner.append_sync_log(guild, member_count).await
        }
    }

    /// Store double whose named operation fails.
    struct FailingStore {
        inner: MemorySyncStore,
        fail_op: &'static str,
    }

    impl FailingStore {
        fn failure(&self, op: &'static str) -> StoreResult<()> {
            if self.fail_op == op {
                Err(StoreError::storage(op, "connection reset"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SyncStore for FailingStore {
        async fn load_members(&self, guild: &GuildId) -> StoreResult<Vec<AccountId>> {
            self.failure("load_members")?;
            self.inner.load_members(guild).await
        }

        async fn begin_guild(&self, guild: &GuildId) -> StoreResult<()> {
            self.failure("begin_guild")?;
            self.inner.begin_guild(guild).await
        }

        async fn finish_guild(&self, guild: &GuildId) -> StoreResult<()> {
            self.failure("finish_guild")?;
            self.inner.finish_guild(guild).await
        }

        async fn append_sync_log(&self, guild: &GuildId, member_count: usize) -> StoreResult<()> {
            self.failure("append_sync_log")?;
            self.inner.append_sync_log(guild, member_count).await
        }
    }

    fn engine_with(
        guilds: &[&str],
        store: Arc<dyn SyncStore>,
        updater: Arc<dyn crate::updater::MemberUpdater>,
    ) -> SyncEngine {
        SyncEngine::new(
            guilds.iter().map(|g| GuildId::from(*g)).collect(),
            store,
            updater,
            Arc::new(TracingReporter),
            Duration::from_millis(1),
        )
    }

    async fn seeded_store(guilds: &[(&str, &[&str])]) -> MemorySyncStore {
        let store = MemorySyncStore::new();
        for (guild, members) in guilds {
            store
                .seed_members(
                    GuildId::from(*guild),
                    members.iter().map(|m| AccountId::from(*m)).collect(),
                )
                .await;
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_books_progress_for_every_guild() {
        let store = Arc::new(seeded_store(&[("A", &["a1", "a2"]), ("B", &["b1"])]).await);
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&["A", "B"], store.clone(), updater.clone());

        engine.run().await.unwrap();

        for (guild, count) in [("A", 2), ("B", 1)] {
            let record = store.record(&GuildId::from(guild)).await.unwrap();
            assert!(record.finished_update.is_some());
            assert_eq!(record.times_updated, 1);

            let logs = store.log_entries().await;
            let entry = logs
                .iter()
                .find(|e| e.guild_id == GuildId::from(guild))
                .unwrap();
            assert_eq!(entry.members_updated, count);
        }
        assert_eq!(updater.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guilds_processed_serially_in_configured_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(JournalingStore {
            inner: seeded_store(&[("A", &["a1"]), ("B", &["b1"])]).await,
            journal: journal.clone(),
        });
        let updater = Arc::new(ScriptedUpdater::ok().with_journal(journal.clone()));
        let mut engine = engine_with(&["A", "B"], store, updater);

        engine.run().await.unwrap();

        let events = journal.lock().unwrap().clone();
        assert_eq!(
            events,
            [
                "begin(A)",
                "process(A,a1)",
                "finish(A)",
                "log(A,1)",
                "begin(B)",
                "process(B,b1)",
                "finish(B)",
                "log(B,1)",
            ]
            .map(String::from)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_member_guild_still_books_a_pass() {
        let store = Arc::new(seeded_store(&[("A", &[])]).await);
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&["A"], store.clone(), updater.clone());

        engine.run().await.unwrap();

        let record = store.record(&GuildId::from("A")).await.unwrap();
        assert!(record.finished_update.is_some());
        assert_eq!(record.times_updated, 1);

        let logs = store.log_entries().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].members_updated, 0);
        assert!(updater.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_work_list_writes_nothing() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(JournalingStore {
            inner: MemorySyncStore::new(),
            journal: journal.clone(),
        });
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&[], store, updater.clone());

        engine.run().await.unwrap();

        assert!(journal.lock().unwrap().is_empty());
        assert!(updater.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_failures_never_abort_the_run() {
        let store = Arc::new(seeded_store(&[("A", &["m1", "m2", "m3"]), ("B", &["b1"])]).await);
        let updater = Arc::new(
            ScriptedUpdater::ok()
                .with_outcome("m1", UpdateOutcome::Rejected)
                .with_outcome(
                    "m2",
                    UpdateOutcome::Unexpected { status: 500 },
                )
                .with_outcome(
                    "m3",
                    UpdateOutcome::Transport {
                        error: "connection refused".to_string(),
                    },
                ),
        );
        let mut engine = engine_with(&["A", "B"], store.clone(), updater.clone());

        engine.run().await.unwrap();

        // Every member counts as processed, including the failed ones, and
        // the following guild is still reached.
        assert_eq!(updater.calls().len(), 4);
        let logs = store.log_entries().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(
            logs.iter()
                .find(|e| e.guild_id == GuildId::from("A"))
                .unwrap()
                .members_updated,
            3
        );
        assert!(store
            .record(&GuildId::from("B"))
            .await
            .unwrap()
            .finished_update
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_member_is_processed_twice() {
        let store = Arc::new(seeded_store(&[("A", &["m1", "m2", "m3", "m4"])]).await);
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&["A"], store, updater.clone());

        engine.run().await.unwrap();

        let calls = updater.calls();
        let unique: HashSet<_> = calls.iter().cloned().collect();
        assert_eq!(calls.len(), 4);
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_error_loading_members_is_fatal() {
        let store = Arc::new(FailingStore {
            inner: seeded_store(&[("A", &["m1"])]).await,
            fail_op: "load_members",
        });
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&["A"], store, updater.clone());

        assert!(engine.run().await.is_err());
        assert!(updater.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_error_finishing_guild_is_fatal() {
        let store = Arc::new(FailingStore {
            inner: seeded_store(&[("A", &["m1"]), ("B", &["b1"])]).await,
            fail_op: "finish_guild",
        });
        let updater = Arc::new(ScriptedUpdater::ok());
        let mut engine = engine_with(&["A", "B"], store, updater.clone());

        assert!(engine.run().await.is_err());
        // The failure surfaced before B was touched.
        assert_eq!(updater.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_updated_accumulates_across_runs() {
        let store = Arc::new(seeded_store(&[("A", &["m1"])]).await);

        for _ in 0..2 {
            let updater = Arc::new(ScriptedUpdater::ok());
            let mut engine = engine_with(&["A"], store.clone(), updater);
            engine.run().await.unwrap();
        }

        let record = store.record(&GuildId::from("A")).await.unwrap();
        assert_eq!(record.times_updated, 2);

        let logs = store.log_entries().await;
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|e| e.members_updated == 1));
    }

    /// Two guild loads plus three member updates is five units of work, and
    /// every unit costs exactly one tick.
    #[tokio::test(start_paused = true)]
    async fn test_one_tick_per_unit_of_work() {
        let store = Arc::new(seeded_store(&[("A", &["a1", "a2"]), ("B", &["b1"])]).await);
        let updater = Arc::new(ScriptedUpdater::ok());
        let period = Duration::from_millis(250);
        let mut engine = SyncEngine::new(
            vec![GuildId::from("A"), GuildId::from("B")],
            store,
            updater,
            Arc::new(TracingReporter),
            period,
        );

        let started = Instant::now();
        engine.run().await.unwrap();
        assert_eq!(started.elapsed(), period * 5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Arbitrary guild/member shapes: each member is updated exactly
        /// once, and each guild gets exactly one summary row with its pool
        /// size.
        #[test]
        fn prop_traversal_accounting(member_counts in proptest::collection::vec(0usize..5, 0..6)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                tokio::time::pause();

                let store = Arc::new(MemorySyncStore::new());
                let mut guilds = Vec::new();
                for (i, count) in member_counts.iter().enumerate() {
                    let guild = GuildId::from(format!("guild-{i}"));
                    let members: Vec<AccountId> = (0..*count)
                        .map(|j| AccountId::from(format!("member-{i}-{j}")))
                        .collect();
                    store.seed_members(guild.clone(), members).await;
                    guilds.push(guild);
                }

                let updater = Arc::new(ScriptedUpdater::ok());
                let mut engine = SyncEngine::new(
                    guilds.clone(),
                    store.clone(),
                    updater.clone(),
                    Arc::new(TracingReporter),
                    Duration::from_millis(1),
                );
                engine.run().await.unwrap();

                let calls = updater.calls();
                let total: usize = member_counts.iter().sum();
                assert_eq!(calls.len(), total);
                let unique: HashSet<_> = calls.iter().cloned().collect();
                assert_eq!(unique.len(), total);

                let logs = store.log_entries().await;
                assert_eq!(logs.len(), guilds.len());
                for (guild, count) in guilds.iter().zip(&member_counts) {
                    let record = store.record(guild).await.unwrap();
                    assert_eq!(record.times_updated, 1);
                    assert!(record.finished_update.is_some());

                    let entry = logs.iter().find(|e| &e.guild_id == guild).unwrap();
                    assert_eq!(entry.members_updated, *count);
                }
            });
        }
    }
}
