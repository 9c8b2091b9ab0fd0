//! Task database: the bitemporal engine and reader behind a task API

use crate::config::Config;
use crate::core::clock::{Clock, SystemClock};
use crate::core::record::HistoryRecord;
use crate::core::task::{
    validate_title, Task, TaskHistoryItem, TaskId, TaskPayload, TaskWithDeletion,
};
use crate::core::temporal::{Interval, Timestamp};
use crate::engine::{BitemporalEngine, Supersession};
use crate::error::Result;
use crate::query::SnapshotReader;
use crate::storage::{FileWal, HistoryLog, HistoryStore, InMemoryWal};
use tracing::info;
use uuid::Uuid;

/// Name of the log holding task history
const TASK_TABLE: &str = "tasks";

/// Volatile task store
pub type InMemoryTaskLog = HistoryLog<TaskPayload, InMemoryWal<TaskPayload>>;

/// Task store backed by a log file
pub type FileTaskLog = HistoryLog<TaskPayload, FileWal>;

/// Bitemporal task database
pub struct TaskDB<S, C = SystemClock> {
    engine: BitemporalEngine<S>,
    reader: SnapshotReader<S>,
    clock: C,
}

impl TaskDB<InMemoryTaskLog> {
    /// Create a new in-memory task database
    pub fn in_memory() -> Self {
        Self::with_clock(InMemoryTaskLog::in_memory(), SystemClock)
    }
}

impl TaskDB<FileTaskLog> {
    /// Open the task log under `config.data_dir`, replaying its history
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.history_path(TASK_TABLE);
        let log = FileTaskLog::open(&path, config)?;
        info!(path = %path.display(), "opened task database");
        Ok(Self::with_clock(log, SystemClock))
    }
}

impl<S, C> TaskDB<S, C>
where
    S: HistoryStore<TaskPayload> + Clone,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            engine: BitemporalEngine::new(store.clone()),
            reader: SnapshotReader::new(store),
            clock,
        }
    }

    pub fn store(&self) -> &S {
        self.engine.store()
    }

    /// The instant this database would record as transaction time
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Tasks valid now, as currently believed, ordered by id
    pub async fn read_current(&self, id: Option<&TaskId>) -> Result<Vec<Task>> {
        let now = self.clock.now();
        let rows = self.reader.current::<TaskPayload>(id, now).await?;
        Ok(rows
            .into_iter()
            .map(|row| Task {
                id: row.entity_id,
                title: row.payload.title,
                completed_at: row.payload.completed_at,
            })
            .collect())
    }

    /// The task's valid-time timeline, earliest segment first
    pub async fn read_history(&self, id: &TaskId) -> Result<Vec<TaskHistoryItem>> {
        let now = self.clock.now();
        self.history_as_known_at(id, now).await
    }

    /// The task's timeline as it was believed at `transact_at`
    pub async fn history_as_known_at(
        &self,
        id: &TaskId,
        transact_at: Timestamp,
    ) -> Result<Vec<TaskHistoryItem>> {
        let segments = self
            .reader
            .history_as_known_at::<TaskPayload>(id, transact_at)
            .await?;
        Ok(segments
            .into_iter()
            .map(|segment| TaskHistoryItem {
                title: segment.payload.title,
                completed_at: segment.payload.completed_at,
                valid_from: segment.valid_from,
                valid_to: segment.valid_to,
            })
            .collect())
    }

    /// Every task's latest state, deleted tasks included
    pub async fn read_all_with_deleted(&self) -> Result<Vec<TaskWithDeletion>> {
        let now = self.clock.now();
        let latest = self
            .reader
            .all_with_deletion_markers::<TaskPayload>(now)
            .await?;
        Ok(latest
            .into_iter()
            .map(|row| TaskWithDeletion {
                id: row.entity_id,
                title: row.payload.title,
                completed_at: row.payload.completed_at,
                deleted_at: row.deleted_at,
            })
            .collect())
    }

    /// Every row ever written for the task
    pub async fn audit(&self, id: &TaskId) -> Result<Vec<HistoryRecord<TaskPayload>>> {
        self.reader.audit::<TaskPayload>(id).await
    }

    /// Create a task valid from now on
    pub async fn create(&self, title: &str, completed_at: Option<Timestamp>) -> Result<TaskId> {
        let payload = TaskPayload::new(title, completed_at)?;
        let id = TaskId::new(Uuid::new_v4().to_string());
        let now = self.clock.now();

        self.engine
            .assert_new(&id, payload, Interval::since(now), now)
            .await?;
        Ok(id)
    }

    /// Apply `transform` to the task over `[from, to)`; returning `None`
    /// deletes that slice
    pub async fn mutate<F>(
        &self,
        id: &TaskId,
        transform: F,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<Supersession>
    where
        F: FnMut(&TaskPayload) -> Option<TaskPayload> + Send,
    {
        let window = Interval::new(from, to)?;
        self.engine.update(id, transform, window, &self.clock).await
    }

    /// Apply `transform` from `from` on. Unlike [`mutate`](Self::mutate), a
    /// task that is not valid at `from` is reported as not found.
    async fn mutate_from<F>(
        &self,
        id: &TaskId,
        transform: F,
        from: Timestamp,
    ) -> Result<Supersession>
    where
        F: FnMut(&TaskPayload) -> Option<TaskPayload> + Send,
    {
        self.engine
            .update_existing(id, transform, Interval::since(from), &self.clock)
            .await
    }

    /// Rename the task from now on
    pub async fn update_title(&self, id: &TaskId, title: &str) -> Result<Supersession> {
        let title = validate_title(title.to_string())?;
        let now = self.clock.now();
        self.mutate_from(
            id,
            move |task: &TaskPayload| {
                Some(TaskPayload {
                    title: title.clone(),
                    ..task.clone()
                })
            },
            now,
        )
        .await
    }

    /// Mark the task completed at `completed_at`, effective from that instant.
    /// `None` reopens it from now on.
    pub async fn update_completed(
        &self,
        id: &TaskId,
        completed_at: Option<Timestamp>,
    ) -> Result<Supersession> {
        let from = completed_at.unwrap_or_else(|| self.clock.now());
        self.mutate_from(
            id,
            move |task: &TaskPayload| {
                Some(TaskPayload {
                    completed_at,
                    ..task.clone()
                })
            },
            from,
        )
        .await
    }

    /// End the task's validity now
    pub async fn delete(&self, id: &TaskId) -> Result<Supersession> {
        let now = self.clock.now();
        self.mutate_from(id, |_: &TaskPayload| None, now).await
    }

    /// Overwrite the task over exactly `[from, to)`, gaps included
    pub async fn replace(
        &self,
        id: &TaskId,
        title: &str,
        completed_at: Option<Timestamp>,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<Supersession> {
        let payload = TaskPayload::new(title, completed_at)?;
        let window = Interval::new(from, to)?;
        self.engine.replace(id, payload, window, &self.clock).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::error::Error;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestDB = TaskDB<InMemoryTaskLog, Arc<ManualClock>>;

    fn secs(s: i64) -> Timestamp {
        Timestamp::from_secs(s)
    }

    fn manual_db() -> (TestDB, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(secs(1_000)));
        let db = TaskDB::with_clock(InMemoryTaskLog::in_memory(), Arc::clone(&clock));
        (db, clock)
    }

    #[tokio::test]
    async fn test_create_and_read_current() {
        let (db, _) = manual_db();
        let id = db.create("Buy milk", None).await.unwrap();

        let tasks = db.read_current(None).await.unwrap();
        assert_eq!(
            tasks,
            vec![Task {
                id: id.clone(),
                title: "Buy milk".to_string(),
                completed_at: None,
            }]
        );
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[tokio::test]
    async fn test_complete_splits_history() {
        let (db, clock) = manual_db();
        let t0 = clock.now();
        let id = db.create("Buy milk", None).await.unwrap();

        let t1 = clock.advance_secs(60);
        db.mutate(
            &id,
            move |task: &TaskPayload| {
                Some(TaskPayload {
                    completed_at: Some(t1),
                    ..task.clone()
                })
            },
            Some(t1),
            None,
        )
        .await
        .unwrap();

        let history = db.read_history(&id).await.unwrap();
        assert_eq!(
            history,
            vec![
                TaskHistoryItem {
                    title: "Buy milk".to_string(),
                    completed_at: None,
                    valid_from: Some(t0),
                    valid_to: Some(t1),
                },
                TaskHistoryItem {
                    title: "Buy milk".to_string(),
                    completed_at: Some(t1),
                    valid_from: Some(t1),
                    valid_to: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_a_deletion_marker() {
        let (db, clock) = manual_db();
        let id = db.create("Buy milk", None).await.unwrap();
        let t1 = clock.advance_secs(60);
        db.update_completed(&id, Some(t1)).await.unwrap();

        let t2 = clock.advance_secs(60);
        db.delete(&id).await.unwrap();

        assert!(db.read_current(None).await.unwrap().is_empty());
        assert!(db.read_current(Some(&id)).await.unwrap().is_empty());

        let all = db.read_all_with_deleted().await.unwrap();
        assert_eq!(
            all,
            vec![TaskWithDeletion {
                id: id.clone(),
                title: "Buy milk".to_string(),
                completed_at: Some(t1),
                deleted_at: Some(t2),
            }]
        );

        // The belief from before the deletion is still there.
        let before = db.history_as_known_at(&id, t1).await.unwrap();
        assert_eq!(before.last().map(|item| item.valid_to), Some(None));
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_windows_both_apply() {
        let (db, clock) = manual_db();
        let t0 = clock.now();
        let id = db.create("Buy milk", None).await.unwrap();
        let (t1, t2) = (t0.add_secs(60), t0.add_secs(120));
        clock.advance_secs(300);

        let rename = |title: &'static str| {
            move |task: &TaskPayload| {
                Some(TaskPayload {
                    title: title.to_string(),
                    ..task.clone()
                })
            }
        };
        let (first, second) = tokio::join!(
            db.mutate(&id, rename("early"), Some(t0), Some(t1)),
            db.mutate(&id, rename("late"), Some(t1), Some(t2)),
        );
        first.unwrap();
        second.unwrap();

        let history = db.read_history(&id).await.unwrap();
        let segments: Vec<(&str, Option<Timestamp>, Option<Timestamp>)> = history
            .iter()
            .map(|item| (item.title.as_str(), item.valid_from, item.valid_to))
            .collect();
        assert_eq!(
            segments,
            vec![
                ("early", Some(t0), Some(t1)),
                ("late", Some(t1), Some(t2)),
                ("Buy milk", Some(t2), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let (db, clock) = manual_db();
        db.create("a", None).await.unwrap();
        db.create("b", None).await.unwrap();
        clock.advance_secs(1);

        let first = db.read_current(None).await.unwrap();
        let second = db.read_current(None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first[0].id < first[1].id);
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected_before_writing() {
        let (db, _) = manual_db();
        assert!(matches!(
            db.create("   ", None).await,
            Err(Error::Validation(_))
        ));
        assert!(db.store().is_empty().await);

        let id = db.create("real", None).await.unwrap();
        assert!(matches!(
            db.update_title(&id, "").await,
            Err(Error::Validation(_))
        ));
        assert_eq!(db.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_update_title_from_now() {
        let (db, clock) = manual_db();
        let id = db.create("  draft ", None).await.unwrap();
        clock.advance_secs(10);
        db.update_title(&id, "final").await.unwrap();

        let titles: Vec<String> = db
            .read_history(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(titles, vec!["draft", "final"]);
    }

    #[tokio::test]
    async fn test_reopen_clears_completion_from_now() {
        let (db, clock) = manual_db();
        let id = db.create("Buy milk", None).await.unwrap();
        let done = clock.advance_secs(10);
        db.update_completed(&id, Some(done)).await.unwrap();
        clock.advance_secs(10);
        db.update_completed(&id, None).await.unwrap();

        let completions: Vec<Option<Timestamp>> = db
            .read_history(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.completed_at)
            .collect();
        assert_eq!(completions, vec![None, Some(done), None]);
    }

    #[tokio::test]
    async fn test_mutating_unknown_task_is_not_found() {
        let (db, _) = manual_db();
        let ghost = TaskId::from("ghost");
        assert!(matches!(
            db.delete(&ghost).await,
            Err(Error::NotFound(_))
        ));
        assert!(db.read_history(&ghost).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_changes_to_a_deleted_task_are_not_found() {
        let (db, clock) = manual_db();
        let created = clock.now();
        let id = db.create("Buy milk", None).await.unwrap();
        clock.advance_secs(10);
        db.delete(&id).await.unwrap();
        clock.advance_secs(10);
        let rows = db.store().len().await;

        assert!(db.read_current(Some(&id)).await.unwrap().is_empty());
        assert!(matches!(
            db.update_title(&id, "Buy oat milk").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(db.delete(&id).await, Err(Error::NotFound(_))));
        assert!(matches!(
            db.update_completed(&id, None).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(db.store().len().await, rows);

        // Completing it back when it still existed is fine.
        let done = created.add_secs(5);
        let outcome = db.update_completed(&id, Some(done)).await.unwrap();
        assert_eq!(outcome.superseded.len(), 1);

        // So is a correction to its past through the general mutation.
        let outcome = db
            .mutate(&id, |_: &TaskPayload| None, Some(created), Some(done))
            .await
            .unwrap();
        assert_eq!(outcome.superseded.len(), 1);
    }

    /// Moves one second forward every time it is read
    struct TickingClock(ManualClock);

    impl Clock for TickingClock {
        fn now(&self) -> Timestamp {
            self.0.advance_secs(1)
        }
    }

    #[tokio::test]
    async fn test_concurrent_writes_stamp_in_lock_order() {
        let clock = Arc::new(TickingClock(ManualClock::new(secs(1_000))));
        let db = TaskDB::with_clock(InMemoryTaskLog::in_memory(), Arc::clone(&clock));
        let id = db.create("Buy milk", None).await.unwrap();
        let t0 = secs(1_001);
        let (t1, t2) = (t0.add_secs(60), t0.add_secs(120));

        let rename = |title: &'static str| {
            move |task: &TaskPayload| {
                Some(TaskPayload {
                    title: title.to_string(),
                    ..task.clone()
                })
            }
        };
        let (first, second) = tokio::join!(
            db.mutate(&id, rename("early"), Some(t0), Some(t1)),
            db.mutate(&id, rename("late"), Some(t1), Some(t2)),
        );
        first.unwrap();
        second.unwrap();

        let audit = db.audit(&id).await.unwrap();
        let stamps: Vec<Option<Timestamp>> = audit.iter().map(|r| r.transact_from).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
        let titles: Vec<String> = db
            .history_as_known_at(&id, secs(2_000))
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(titles, vec!["early", "late", "Buy milk"]);
    }

    #[tokio::test]
    async fn test_replace_backfills_before_creation() {
        let (db, clock) = manual_db();
        let created = clock.now();
        let id = db.create("Buy milk", None).await.unwrap();
        clock.advance_secs(10);

        let earlier = created.add_secs(-100);
        db.replace(&id, "Buy bread", None, Some(earlier), Some(created.add_secs(5)))
            .await
            .unwrap();

        let segments: Vec<(String, Option<Timestamp>)> = db
            .read_history(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| (item.title, item.valid_from))
            .collect();
        assert_eq!(
            segments,
            vec![
                ("Buy bread".to_string(), Some(earlier)),
                ("Buy milk".to_string(), Some(created.add_secs(5))),
            ]
        );
    }

    #[tokio::test]
    async fn test_file_backed_database_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let id = {
            let db = TaskDB::open(&config).unwrap();
            let id = db.create("Buy milk", None).await.unwrap();
            db.update_title(&id, "Buy oat milk").await.unwrap();
            id
        };

        let db = TaskDB::open(&config).unwrap();
        let audit = db.audit(&id).await.unwrap();
        assert!(audit[0].is_superseded());
        assert!(audit.len() >= 2);
        let current = db.read_current(Some(&id)).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].title, "Buy oat milk");
    }
}
