use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::gateway::{IndexParams, StorageClient, StoreError, StoreParams, TxMode, VersionChange};
use crate::task::Task;

pub const DATABASE_NAME: &str = "ToDoDB";
pub const DATABASE_VERSION: u32 = 3;
pub const TASKS_STORE: &str = "tasks";
pub const TASK_KEY_PATH: &str = "taskId";
pub const TASK_INDEXES: [&str; 3] = ["hours", "minutes", "finished"];

/// Creates the `tasks` store and its indexes. Every step only runs when the
/// target is missing, so upgrading from any older version is safe.
pub fn upgrade_task_schema(change: &mut VersionChange<'_>) -> Result<(), StoreError> {
    debug!(
        old_version = change.old_version(),
        new_version = change.new_version(),
        "applying task schema"
    );

    if !change.has_object_store(TASKS_STORE) {
        change.create_object_store(
            TASKS_STORE,
            StoreParams {
                key_path: TASK_KEY_PATH.to_string(),
                auto_increment: true,
            },
        )?;
    }

    let mut tasks = change.object_store_mut(TASKS_STORE)?;
    for index in TASK_INDEXES {
        if !tasks.has_index(index) {
            tasks.create_index(index, index, IndexParams { unique: false })?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct TaskRepository {
    client: StorageClient,
}

impl TaskRepository {
    pub fn new(client: StorageClient) -> Self {
        Self { client }
    }

    /// Repository over `<data_dir>/<name>.json`. Nothing is opened until the
    /// first operation.
    pub fn lazy(data_dir: &Path, name: &str) -> Self {
        let path = data_dir.join(format!("{name}.json"));
        Self::new(StorageClient::new(path, name, DATABASE_VERSION, upgrade_task_schema))
    }

    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    #[instrument(skip(self, task), fields(title = %task.title))]
    pub fn add(&mut self, task: Task) -> anyhow::Result<Task> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadWrite)?;
        let key = tx
            .object_store(TASKS_STORE)?
            .add_typed(&task)
            .context("failed to insert task")?;
        tx.commit().context("failed to commit new task")?;

        let mut task = task;
        task.task_id = Some(key);
        info!(task_id = key, "task added");
        Ok(task)
    }

    #[instrument(skip(self))]
    pub fn get(&mut self, task_id: u64) -> anyhow::Result<Option<Task>> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadOnly)?;
        let task = tx
            .object_store(TASKS_STORE)?
            .get_typed::<Task>(task_id)
            .with_context(|| format!("failed to read task {task_id}"))?;
        tx.commit()?;
        Ok(task)
    }

    /// Every task in key order.
    #[instrument(skip(self))]
    pub fn all(&mut self) -> anyhow::Result<Vec<Task>> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadOnly)?;
        let tasks = tx
            .object_store(TASKS_STORE)?
            .get_all_typed::<Task>()
            .context("failed to read tasks")?;
        tx.commit()?;
        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    /// Tasks by completion state. Finished tasks come from the `finished`
    /// index; unfinished ones carry no `finished` value and are the rest.
    #[instrument(skip(self))]
    pub fn by_finished(&mut self, finished: bool) -> anyhow::Result<Vec<Task>> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadOnly)?;
        let tasks = {
            let store = tx.object_store(TASKS_STORE)?;
            let done_keys = store.index("finished")?.get_all_keys(&Value::Bool(true));
            let all = store.get_all_typed::<Task>().context("failed to read tasks")?;
            all.into_iter()
                .filter(|task| {
                    let indexed = task.task_id.is_some_and(|id| done_keys.contains(&id));
                    indexed == finished
                })
                .collect::<Vec<_>>()
        };
        tx.commit()?;
        debug!(count = tasks.len(), "loaded tasks by completion");
        Ok(tasks)
    }

    /// Read and delete in one transaction. Returns the removed task, or
    /// `None` when no task has this id.
    #[instrument(skip(self))]
    pub fn delete(&mut self, task_id: u64) -> anyhow::Result<Option<Task>> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadWrite)?;
        let removed = {
            let mut store = tx.object_store(TASKS_STORE)?;
            let existing = store
                .get_typed::<Task>(task_id)
                .with_context(|| format!("failed to read task {task_id}"))?;
            if existing.is_some() {
                store.delete(task_id)?;
            }
            existing
        };

        if removed.is_none() {
            tx.abort();
            debug!("no task to delete");
            return Ok(None);
        }

        tx.commit().with_context(|| format!("failed to commit deletion of task {task_id}"))?;
        info!("task deleted");
        Ok(removed)
    }

    /// Read, mark finished and write back in one transaction.
    #[instrument(skip(self, now))]
    pub fn finish(&mut self, task_id: u64, now: DateTime<Utc>) -> anyhow::Result<Option<Task>> {
        let db = self.client.database().context("failed to open task database")?;
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadWrite)?;
        let updated = {
            let mut store = tx.object_store(TASKS_STORE)?;
            match store
                .get_typed::<Task>(task_id)
                .with_context(|| format!("failed to read task {task_id}"))?
            {
                Some(mut task) => {
                    task.mark_finished(now);
                    store.put_typed(&task).context("failed to update task")?;
                    Some(task)
                }
                None => None,
            }
        };

        if updated.is_none() {
            tx.abort();
            debug!("no task to finish");
            return Ok(None);
        }

        tx.commit().with_context(|| format!("failed to commit finish of task {task_id}"))?;
        info!(finished_at = %now, "task finished");
        Ok(updated)
    }

    pub fn close(&mut self) {
        self.client.close();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::gateway::Database;

    fn pay_bills() -> Task {
        Task::new("Pay bills".to_string(), "2024-03-01".to_string(), 9, 5)
    }

    #[test]
    fn schema_upgrade_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("ToDoDB.json");

        Database::open(&path, DATABASE_NAME, 2, |change| {
            change.create_object_store(
                TASKS_STORE,
                StoreParams {
                    key_path: TASK_KEY_PATH.to_string(),
                    auto_increment: true,
                },
            )?;
            change
                .object_store_mut(TASKS_STORE)?
                .create_index("hours", "hours", IndexParams::default())
        })
        .expect("open v2");

        let mut db = Database::open(&path, DATABASE_NAME, DATABASE_VERSION, upgrade_task_schema).expect("open v3");
        let mut tx = db.transaction(&[TASKS_STORE], TxMode::ReadOnly).expect("tx");
        let store = tx.object_store(TASKS_STORE).expect("store");
        assert_eq!(store.key_path(), TASK_KEY_PATH);
        assert!(store.auto_increment());
        assert_eq!(store.index_names(), vec!["finished", "hours", "minutes"]);
    }

    #[test]
    fn add_assigns_first_id() {
        let temp = tempdir().expect("tempdir");
        let mut repo = TaskRepository::lazy(temp.path(), DATABASE_NAME);
        assert!(!repo.client().is_open());

        let task = repo.add(pay_bills()).expect("add");
        assert_eq!(task.task_id, Some(1));
        assert!(repo.client().is_open());
        assert_eq!(repo.get(1).expect("get"), Some(task));
        assert_eq!(repo.get(2).expect("get missing"), None);
    }

    #[test]
    fn delete_and_finish_report_missing_tasks() {
        let temp = tempdir().expect("tempdir");
        let mut repo = TaskRepository::lazy(temp.path(), DATABASE_NAME);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid now");

        assert_eq!(repo.delete(7).expect("delete"), None);
        assert_eq!(repo.finish(7, now).expect("finish"), None);
        assert!(repo.all().expect("all").is_empty());
    }

    #[test]
    fn by_finished_splits_tasks() {
        let temp = tempdir().expect("tempdir");
        let mut repo = TaskRepository::lazy(temp.path(), DATABASE_NAME);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().expect("valid now");

        repo.add(pay_bills()).expect("add");
        repo.add(Task::new("Walk".to_string(), "2024-03-02".to_string(), 7, 0))
            .expect("add");
        repo.finish(2, now).expect("finish").expect("task 2 exists");

        let done = repo.by_finished(true).expect("finished");
        let open = repo.by_finished(false).expect("pending");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].title, "Walk");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "Pay bills");
    }
}
