//! In-process [`DataStore`] used by tests and when no database is
//! configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use teamboard_common::model::{
    ChatMessage, Comment, Member, Notification, PresenceRecord, Project, ProjectRole, ReadReceipt,
    Task, TaskPriority, TaskStatus, UserSummary,
};

use super::store::{
    DataStore, NewComment, NewMessage, NewNotification, NewTask, ReorderPlan, StoreError,
    StoreResult, TaskUpdate,
};

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserSummary>,
    projects: HashMap<String, Project>,
    members: HashMap<(String, String), (ProjectRole, chrono::DateTime<Utc>)>,
    tasks: HashMap<String, Task>,
    messages: BTreeMap<i64, ChatMessage>,
    receipts: HashMap<(i64, String), ReadReceipt>,
    comments: BTreeMap<i64, Comment>,
    notifications: Vec<Notification>,
    presence: HashMap<String, PresenceRecord>,
}

impl Inner {
    fn member(&self, project_id: &str, user_id: &str) -> Option<Member> {
        let (role, joined_at) = self
            .members
            .get(&(project_id.to_string(), user_id.to_string()))?;
        Some(Member {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            user_name: self
                .users
                .get(user_id)
                .map(|u| u.name.clone())
                .unwrap_or_default(),
            role: *role,
            joined_at: *joined_at,
        })
    }

    fn column(&self, project_id: &str, status: TaskStatus) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    fn next_position(&self, project_id: &str, status: TaskStatus) -> i32 {
        self.tasks
            .values()
            .filter(|t| t.project_id == project_id && t.status == status)
            .map(|t| t.position + 1)
            .max()
            .unwrap_or(0)
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    // -- seeding -----------------------------------------------------------

    pub fn insert_user(&self, id: &str, name: &str) {
        self.inner.lock().users.insert(
            id.to_string(),
            UserSummary {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Insert a project and make `owner_id` its owner.
    pub fn insert_project(&self, id: &str, name: &str, owner_id: &str) -> Project {
        let project = Project {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock();
        inner.projects.insert(id.to_string(), project.clone());
        inner.members.insert(
            (id.to_string(), owner_id.to_string()),
            (ProjectRole::Owner, Utc::now()),
        );
        project
    }

    /// Add or change a membership.
    pub fn set_member(&self, project_id: &str, user_id: &str, role: ProjectRole) {
        self.inner.lock().members.insert(
            (project_id.to_string(), user_id.to_string()),
            (role, Utc::now()),
        );
    }

    pub fn remove_member(&self, project_id: &str, user_id: &str) {
        self.inner
            .lock()
            .members
            .remove(&(project_id.to_string(), user_id.to_string()));
    }

    /// Append a task to the end of `status` in `project_id`.
    pub fn seed_task(&self, project_id: &str, title: &str, status: TaskStatus) -> Task {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let task = Task {
            id: teamboard_common::id::prefixed_ulid(teamboard_common::id::prefix::TASK),
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: None,
            status,
            position: inner.next_position(project_id, status),
            priority: TaskPriority::Medium,
            assignee_id: None,
            created_by: inner
                .projects
                .get(project_id)
                .map(|p| p.owner_id.clone())
                .unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(task.id.clone(), task.clone());
        task
    }

    pub fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        self.inner
            .lock()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn presence_of(&self, user_id: &str) -> Option<PresenceRecord> {
        self.inner.lock().presence.get(user_id).cloned()
    }

    pub fn message_count(&self, project_id: &str) -> usize {
        self.inner
            .lock()
            .messages
            .values()
            .filter(|m| m.project_id == project_id)
            .count()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserSummary>> {
        self.check()?;
        Ok(self.inner.lock().users.get(user_id).cloned())
    }

    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        self.check()?;
        Ok(self.inner.lock().projects.get(project_id).cloned())
    }

    async fn get_membership(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Member>> {
        self.check()?;
        Ok(self.inner.lock().member(project_id, user_id))
    }

    async fn list_members(&self, project_id: &str) -> StoreResult<Vec<Member>> {
        self.check()?;
        let inner = self.inner.lock();
        let mut members: Vec<Member> = inner
            .members
            .keys()
            .filter(|(pid, _)| pid == project_id)
            .filter_map(|(pid, uid)| inner.member(pid, uid))
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(members)
    }

    async fn project_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .members
            .keys()
            .filter(|(_, uid)| uid == user_id)
            .map(|(pid, _)| pid.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.check()?;
        Ok(self.inner.lock().tasks.get(task_id).cloned())
    }

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<Task>> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(TaskStatus::ALL
            .into_iter()
            .flat_map(|status| inner.column(project_id, status))
            .collect())
    }

    async fn list_column(&self, project_id: &str, status: TaskStatus) -> StoreResult<Vec<Task>> {
        self.check()?;
        Ok(self.inner.lock().column(project_id, status))
    }

    async fn create_task(&self, task: NewTask) -> StoreResult<Task> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(format!("task {} already exists", task.id)));
        }
        let now = Utc::now();
        let created = Task {
            position: inner.next_position(&task.project_id, task.status),
            id: task.id,
            project_id: task.project_id,
            title: task.title,
            description: task.description,
            status: task.status,
            priority: task.priority,
            assignee_id: task.assignee_id,
            created_by: task.created_by,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Task> {
        self.check()?;
        let mut inner = self.inner.lock();
        let task = inner.tasks.get_mut(task_id).ok_or(StoreError::NotFound)?;
        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, task_id: &str) -> StoreResult<Task> {
        self.check()?;
        let mut inner = self.inner.lock();
        let task = inner.tasks.remove(task_id).ok_or(StoreError::NotFound)?;
        inner.comments.retain(|_, c| c.task_id != task_id);
        Ok(task)
    }

    async fn assign_task(&self, task_id: &str, assignee_id: Option<&str>) -> StoreResult<Task> {
        self.check()?;
        let mut inner = self.inner.lock();
        let task = inner.tasks.get_mut(task_id).ok_or(StoreError::NotFound)?;
        task.assignee_id = assignee_id.map(str::to_string);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn commit_reorder(&self, plan: ReorderPlan) -> StoreResult<Task> {
        self.check()?;
        let mut inner = self.inner.lock();

        // Validate everything before touching anything.
        for write in &plan.writes {
            match inner.tasks.get(&write.task_id) {
                Some(task) if task.project_id == plan.project_id => {}
                _ => return Err(StoreError::NotFound),
            }
        }
        if !inner.tasks.contains_key(&plan.task_id) {
            return Err(StoreError::NotFound);
        }

        let now = Utc::now();
        for write in &plan.writes {
            if let Some(task) = inner.tasks.get_mut(&write.task_id) {
                let moved = task.status != write.status || task.position != write.position;
                task.status = write.status;
                task.position = write.position;
                if moved {
                    task.updated_at = now;
                }
            }
        }

        inner
            .tasks
            .get(&plan.task_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        self.check()?;
        let created = ChatMessage {
            id: message.id,
            project_id: message.project_id,
            author_id: message.author_id,
            content: message.content,
            kind: message.kind,
            file_url: message.file_url,
            created_at: Utc::now(),
        };
        self.inner.lock().messages.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_message(&self, message_id: i64) -> StoreResult<Option<ChatMessage>> {
        self.check()?;
        Ok(self.inner.lock().messages.get(&message_id).cloned())
    }

    async fn list_messages(
        &self,
        project_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        self.check()?;
        let inner = self.inner.lock();
        let upper = before.unwrap_or(i64::MAX);
        Ok(inner
            .messages
            .range(..upper)
            .rev()
            .map(|(_, m)| m)
            .filter(|m| m.project_id == project_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_read_receipt(
        &self,
        message_id: i64,
        user_id: &str,
    ) -> StoreResult<ReadReceipt> {
        self.check()?;
        let mut inner = self.inner.lock();
        if !inner.messages.contains_key(&message_id) {
            return Err(StoreError::NotFound);
        }
        let receipt = ReadReceipt {
            message_id,
            user_id: user_id.to_string(),
            read_at: Utc::now(),
        };
        inner
            .receipts
            .insert((message_id, user_id.to_string()), receipt.clone());
        Ok(receipt)
    }

    async fn create_comment(&self, comment: NewComment) -> StoreResult<Comment> {
        self.check()?;
        let mut inner = self.inner.lock();
        if !inner.tasks.contains_key(&comment.task_id) {
            return Err(StoreError::NotFound);
        }
        let created = Comment {
            id: comment.id,
            task_id: comment.task_id,
            author_id: comment.author_id,
            content: comment.content,
            created_at: Utc::now(),
        };
        inner.comments.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_comments(
        &self,
        task_id: &str,
        before: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>> {
        self.check()?;
        let inner = self.inner.lock();
        let upper = before.unwrap_or(i64::MAX);
        Ok(inner
            .comments
            .range(..upper)
            .rev()
            .map(|(_, c)| c)
            .filter(|c| c.task_id == task_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        self.check()?;
        let created = Notification {
            id: notification.id,
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            project_id: notification.project_id,
            task_id: notification.task_id,
            created_at: Utc::now(),
        };
        self.inner.lock().notifications.push(created.clone());
        Ok(created)
    }

    async fn set_presence(&self, user_id: &str, online: bool) -> StoreResult<PresenceRecord> {
        self.check()?;
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            online,
            last_active_at: Utc::now(),
        };
        self.inner
            .lock()
            .presence
            .insert(user_id.to_string(), record.clone());
        Ok(record)
    }

    async fn get_presence(&self, user_id: &str) -> StoreResult<Option<PresenceRecord>> {
        self.check()?;
        Ok(self.inner.lock().presence.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::PositionWrite;

    fn seeded() -> (MemoryStore, Vec<Task>) {
        let store = MemoryStore::new();
        store.insert_user("usr_a", "Ada");
        store.insert_project("prj_1", "Board", "usr_a");
        let tasks = vec![
            store.seed_task("prj_1", "A", TaskStatus::Todo),
            store.seed_task("prj_1", "B", TaskStatus::Todo),
        ];
        (store, tasks)
    }

    #[tokio::test]
    async fn seed_task_appends_to_column() {
        let (store, tasks) = seeded();
        assert_eq!(tasks[0].position, 0);
        assert_eq!(tasks[1].position, 1);
        let column = store.list_column("prj_1", TaskStatus::Todo).await.unwrap();
        assert_eq!(column.len(), 2);
    }

    #[tokio::test]
    async fn commit_reorder_rejects_whole_plan_on_unknown_task() {
        let (store, tasks) = seeded();
        let plan = ReorderPlan {
            project_id: "prj_1".into(),
            task_id: tasks[0].id.clone(),
            writes: vec![
                PositionWrite {
                    task_id: tasks[0].id.clone(),
                    status: TaskStatus::Todo,
                    position: 1,
                },
                PositionWrite {
                    task_id: "tsk_missing".into(),
                    status: TaskStatus::Todo,
                    position: 0,
                },
            ],
        };
        assert!(matches!(
            store.commit_reorder(plan).await,
            Err(StoreError::NotFound)
        ));
        let untouched = store.get_task(&tasks[0].id).await.unwrap().unwrap();
        assert_eq!(untouched.position, 0);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let (store, _) = seeded();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_user("usr_a").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get_user("usr_a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_messages_is_newest_first_before_cursor() {
        let (store, _) = seeded();
        for id in 1..=5 {
            store
                .create_message(NewMessage {
                    id,
                    project_id: "prj_1".into(),
                    author_id: "usr_a".into(),
                    content: format!("m{id}"),
                    kind: Default::default(),
                    file_url: None,
                })
                .await
                .unwrap();
        }
        let page = store.list_messages("prj_1", Some(4), 2).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }
}
