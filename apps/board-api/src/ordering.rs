//! Order Reconciliation Service: the authoritative order of tasks within each
//! (project, status) column.
//!
//! Every mutation that changes a column's membership or order holds that
//! column's lock, so concurrent moves into the same column queue up instead
//! of interleaving. Cross-column moves take both locks in key order.

use std::sync::Arc;

use dashmap::DashMap;
use teamboard_common::model::{Task, TaskPosition, TaskStatus};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::store::{DataStore, NewTask, PositionWrite, ReorderPlan, StoreError};

/// A move whose task keeps changing column under us gives up after this many
/// attempts.
const MAX_MOVE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum OrderError {
    /// The task does not exist or the caller cannot see its project.
    #[error("task not found")]
    NotFound,
    /// The caller can see the project but may not change it.
    #[error("write access required")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a committed move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub task: Task,
    pub from_status: TaskStatus,
    /// Destination column after the move.
    pub order: Vec<TaskPosition>,
    /// Source column after the move, when the task changed column.
    pub source_order: Option<Vec<TaskPosition>>,
}

type ColumnKey = (String, TaskStatus);

/// Column locks held by one mutation. Dropping it releases every lock and
/// removes map entries nobody else is holding or waiting on.
struct ColumnLocks<'a> {
    columns: &'a DashMap<ColumnKey, Arc<Mutex<()>>>,
    held: Vec<(ColumnKey, OwnedMutexGuard<()>)>,
}

impl Drop for ColumnLocks<'_> {
    fn drop(&mut self) {
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Waiters clone the Arc under the shard lock, so a count of one
            // here means the map holds the only reference.
            self.columns
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

pub struct OrderService {
    store: Arc<dyn DataStore>,
    columns: DashMap<ColumnKey, Arc<Mutex<()>>>,
}

impl OrderService {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            columns: DashMap::new(),
        }
    }

    async fn lock_columns(&self, mut keys: Vec<ColumnKey>) -> ColumnLocks<'_> {
        keys.sort();
        keys.dedup();

        let mut locks = ColumnLocks {
            columns: &self.columns,
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let lock = Arc::clone(self.columns.entry(key.clone()).or_default().value());
            let guard = lock.lock_owned().await;
            locks.held.push((key, guard));
        }
        locks
    }

    async fn require_writer(&self, project_id: &str, user_id: &str) -> Result<(), OrderError> {
        match self.store.get_membership(project_id, user_id).await? {
            Some(member) if member.role.can_write() => Ok(()),
            Some(_) => Err(OrderError::Forbidden),
            None => Err(OrderError::NotFound),
        }
    }

    /// Move `task_id` to `target_index` (as seen in the client's reordered
    /// column) of `target_status`, renumbering every affected column 0..n.
    /// An index past the end appends.
    pub async fn move_task(
        &self,
        user_id: &str,
        task_id: &str,
        target_status: TaskStatus,
        target_index: usize,
    ) -> Result<MoveOutcome, OrderError> {
        let mut authorized = false;

        for attempt in 1..=MAX_MOVE_ATTEMPTS {
            let task = self.store.get_task(task_id).await?.ok_or(OrderError::NotFound)?;
            if !authorized {
                self.require_writer(&task.project_id, user_id).await?;
                authorized = true;
            }

            let project_id = task.project_id.clone();
            let from_status = task.status;
            let _guards = self
                .lock_columns(vec![
                    (project_id.clone(), from_status),
                    (project_id.clone(), target_status),
                ])
                .await;

            // Re-read under the locks; the task may have moved meanwhile.
            let current = self.store.get_task(task_id).await?.ok_or(OrderError::NotFound)?;
            if current.status != from_status {
                tracing::debug!(task_id, attempt, "task changed column while waiting, retrying");
                continue;
            }

            let mut destination: Vec<Task> = self
                .store
                .list_column(&project_id, target_status)
                .await?
                .into_iter()
                .filter(|t| t.id != task_id)
                .collect();
            let index = target_index.min(destination.len());
            destination.insert(index, current);

            let mut writes = renumber(&destination, target_status);
            let source = if from_status != target_status {
                let source: Vec<Task> = self
                    .store
                    .list_column(&project_id, from_status)
                    .await?
                    .into_iter()
                    .filter(|t| t.id != task_id)
                    .collect();
                let source_writes = renumber(&source, from_status);
                writes.extend(source_writes.iter().cloned());
                Some(source_writes)
            } else {
                None
            };

            let order = positions(writes.iter().filter(|w| w.status == target_status));
            let task = self
                .store
                .commit_reorder(ReorderPlan {
                    project_id: project_id.clone(),
                    task_id: task_id.to_string(),
                    writes,
                })
                .await?;

            tracing::info!(
                task_id,
                %project_id,
                from = %from_status,
                to = %target_status,
                position = task.position,
                "task moved"
            );

            return Ok(MoveOutcome {
                task,
                from_status,
                order,
                source_order: source.map(|writes| positions(writes.iter())),
            });
        }

        Err(OrderError::Store(StoreError::Conflict(
            "task is being moved concurrently".into(),
        )))
    }

    /// Insert a task at the end of its column.
    pub async fn append(&self, task: NewTask) -> Result<Task, OrderError> {
        let _guards = self
            .lock_columns(vec![(task.project_id.clone(), task.status)])
            .await;
        Ok(self.store.create_task(task).await?)
    }

    /// Delete a task while holding its column.
    pub async fn remove(&self, task_id: &str) -> Result<Task, OrderError> {
        for _ in 0..MAX_MOVE_ATTEMPTS {
            let task = self.store.get_task(task_id).await?.ok_or(OrderError::NotFound)?;
            let _guards = self
                .lock_columns(vec![(task.project_id.clone(), task.status)])
                .await;

            match self.store.get_task(task_id).await? {
                Some(current) if current.status == task.status => {
                    return Ok(self.store.delete_task(task_id).await?);
                }
                Some(_) => continue,
                None => return Err(OrderError::NotFound),
            }
        }
        Err(OrderError::Store(StoreError::Conflict(
            "task is being moved concurrently".into(),
        )))
    }
}

fn renumber(column: &[Task], status: TaskStatus) -> Vec<PositionWrite> {
    column
        .iter()
        .enumerate()
        .map(|(i, task)| PositionWrite {
            task_id: task.id.clone(),
            status,
            position: i as i32,
        })
        .collect()
}

fn positions<'a>(writes: impl Iterator<Item = &'a PositionWrite>) -> Vec<TaskPosition> {
    writes
        .map(|w| TaskPosition {
            task_id: w.task_id.clone(),
            position: w.position,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use teamboard_common::model::ProjectRole;

    use super::*;
    use crate::db::MemoryStore;

    struct Board {
        store: Arc<MemoryStore>,
        service: Arc<OrderService>,
    }

    fn board() -> Board {
        let store = Arc::new(MemoryStore::new());
        store.insert_user("u_owner", "Owner");
        store.insert_user("u_view", "Viewer");
        store.insert_user("u_out", "Outsider");
        store.insert_project("p1", "Board", "u_owner");
        store.set_member("p1", "u_view", ProjectRole::Viewer);
        let service = Arc::new(OrderService::new(store.clone()));
        Board { store, service }
    }

    async fn column_ids(store: &MemoryStore, status: TaskStatus) -> Vec<String> {
        store
            .list_column("p1", status)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    async fn assert_total_order(store: &MemoryStore, status: TaskStatus) {
        let column = store.list_column("p1", status).await.unwrap();
        let positions: Vec<i32> = column.iter().map(|t| t.position).collect();
        let unique: HashSet<i32> = positions.iter().copied().collect();
        assert_eq!(unique.len(), positions.len(), "duplicate positions: {positions:?}");
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn move_to_front_of_another_column() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::InProgress);
        let b = store.seed_task("p1", "B", TaskStatus::InProgress);
        let c = store.seed_task("p1", "C", TaskStatus::InProgress);
        let t = store.seed_task("p1", "T", TaskStatus::Todo);

        let outcome = service
            .move_task("u_owner", &t.id, TaskStatus::InProgress, 0)
            .await
            .unwrap();

        assert_eq!(
            column_ids(&store, TaskStatus::InProgress).await,
            vec![t.id.clone(), a.id, b.id, c.id]
        );
        assert_eq!(outcome.task.status, TaskStatus::InProgress);
        assert_eq!(outcome.task.position, 0);
        assert_eq!(outcome.from_status, TaskStatus::Todo);
        assert_eq!(outcome.order.len(), 4);
        assert_eq!(outcome.source_order, Some(vec![]));
        assert_total_order(&store, TaskStatus::InProgress).await;
    }

    #[tokio::test]
    async fn move_within_a_column_renumbers_it() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::Todo);
        let b = store.seed_task("p1", "B", TaskStatus::Todo);
        let c = store.seed_task("p1", "C", TaskStatus::Todo);

        let outcome = service
            .move_task("u_owner", &a.id, TaskStatus::Todo, 2)
            .await
            .unwrap();

        assert_eq!(
            column_ids(&store, TaskStatus::Todo).await,
            vec![b.id, c.id, a.id]
        );
        assert!(outcome.source_order.is_none());
        assert_total_order(&store, TaskStatus::Todo).await;
    }

    #[tokio::test]
    async fn index_past_the_end_appends() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::Done);
        let t = store.seed_task("p1", "T", TaskStatus::Todo);

        let outcome = service
            .move_task("u_owner", &t.id, TaskStatus::Done, 99)
            .await
            .unwrap();
        assert_eq!(outcome.task.position, 1);
        assert_eq!(column_ids(&store, TaskStatus::Done).await, vec![a.id, t.id]);
    }

    #[tokio::test]
    async fn moving_back_restores_the_original_order() {
        let Board { store, service } = board();
        for title in ["A", "B", "C", "D"] {
            store.seed_task("p1", title, TaskStatus::Todo);
        }
        let before = column_ids(&store, TaskStatus::Todo).await;
        let moving = before[1].clone();

        service
            .move_task("u_owner", &moving, TaskStatus::InReview, 0)
            .await
            .unwrap();
        service
            .move_task("u_owner", &moving, TaskStatus::Todo, 1)
            .await
            .unwrap();

        assert_eq!(column_ids(&store, TaskStatus::Todo).await, before);
        assert!(column_ids(&store, TaskStatus::InReview).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_into_one_column_never_collide() {
        let Board { store, service } = board();
        for title in ["A", "B", "C"] {
            store.seed_task("p1", title, TaskStatus::InProgress);
        }
        let movers: Vec<Task> = (0..8)
            .map(|i| store.seed_task("p1", &format!("T{i}"), TaskStatus::Todo))
            .collect();

        let handles: Vec<_> = movers
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let service = service.clone();
                let id = task.id.clone();
                tokio::spawn(async move {
                    service
                        .move_task("u_owner", &id, TaskStatus::InProgress, i % 2)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(column_ids(&store, TaskStatus::InProgress).await.len(), 11);
        assert!(column_ids(&store, TaskStatus::Todo).await.is_empty());
        assert_total_order(&store, TaskStatus::InProgress).await;
        assert!(service.columns.is_empty());
    }

    #[tokio::test]
    async fn viewers_cannot_move_and_nothing_changes() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::Todo);
        let b = store.seed_task("p1", "B", TaskStatus::Todo);

        let result = service
            .move_task("u_view", &b.id, TaskStatus::Todo, 0)
            .await;
        assert!(matches!(result, Err(OrderError::Forbidden)));
        assert_eq!(column_ids(&store, TaskStatus::Todo).await, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn outsiders_and_missing_tasks_are_not_found() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::Todo);

        assert!(matches!(
            service.move_task("u_out", &a.id, TaskStatus::Done, 0).await,
            Err(OrderError::NotFound)
        ));
        assert!(matches!(
            service.move_task("u_owner", "tsk_missing", TaskStatus::Done, 0).await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn store_failure_leaves_positions_untouched() {
        let Board { store, service } = board();
        let a = store.seed_task("p1", "A", TaskStatus::Todo);
        store.set_unavailable(true);

        let result = service.move_task("u_owner", &a.id, TaskStatus::Done, 0).await;
        assert!(matches!(result, Err(OrderError::Store(StoreError::Unavailable(_)))));

        store.set_unavailable(false);
        let unchanged = store.get_task(&a.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn append_and_remove_keep_columns_distinct() {
        let Board { store, service } = board();
        let first = store.seed_task("p1", "A", TaskStatus::Todo);

        let appended = service
            .append(NewTask {
                id: "tsk_new".into(),
                project_id: "p1".into(),
                title: "New".into(),
                description: None,
                status: TaskStatus::Todo,
                priority: Default::default(),
                assignee_id: None,
                created_by: "u_owner".into(),
            })
            .await
            .unwrap();
        assert_eq!(appended.position, first.position + 1);

        let removed = service.remove(&first.id).await.unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(column_ids(&store, TaskStatus::Todo).await, vec!["tsk_new".to_string()]);
        assert!(matches!(service.remove(&first.id).await, Err(OrderError::NotFound)));
    }

    #[tokio::test]
    async fn column_locks_are_released_after_each_mutation() {
        let Board { store, service } = board();
        let task = store.seed_task("p1", "A", TaskStatus::Todo);
        let other = store.seed_task("p1", "B", TaskStatus::InProgress);

        service
            .move_task("u_owner", &task.id, TaskStatus::Done, 0)
            .await
            .unwrap();
        assert!(service.columns.is_empty());

        let held = service
            .lock_columns(vec![(other.project_id.clone(), other.status)])
            .await;
        assert_eq!(service.columns.len(), 1);
        drop(held);
        assert!(service.columns.is_empty());

        service.remove(&task.id).await.unwrap();
        assert!(service.columns.is_empty());
    }
}
