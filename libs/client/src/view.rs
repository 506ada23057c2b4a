//! Local copy of one project's board, chat and presence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use teamboard_common::model::{
    ChatMessage, Member, Project, ProjectRole, Task, TaskPosition, TaskStatus,
};
use teamboard_common::protocol::{PresenceUser, TaskMoved};

use crate::hydrate::Snapshot;

/// Column contents captured before an optimistic change.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBackup {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct ProjectView {
    pub project: Project,
    pub role: ProjectRole,
    pub members: Vec<Member>,
    columns: BTreeMap<TaskStatus, Vec<Task>>,
    /// Oldest first.
    messages: Vec<ChatMessage>,
    online: BTreeMap<String, String>,
    typing: BTreeSet<String>,
    /// Newest message each user has read.
    read_up_to: HashMap<String, i64>,
}

impl ProjectView {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut view = Self {
            project: snapshot.project,
            role: snapshot.role,
            members: snapshot.members,
            columns: BTreeMap::new(),
            messages: Vec::new(),
            online: BTreeMap::new(),
            typing: BTreeSet::new(),
            read_up_to: HashMap::new(),
        };
        for task in snapshot.tasks {
            view.columns.entry(task.status).or_default().push(task);
        }
        for column in view.columns.values_mut() {
            column.sort_by_key(|t| t.position);
        }
        for message in snapshot.messages {
            view.push_message(message);
        }
        view
    }

    /// Replace board and history with a fresh snapshot, keeping live presence.
    pub fn rehydrate(&mut self, snapshot: Snapshot) {
        let online = std::mem::take(&mut self.online);
        *self = Self::from_snapshot(snapshot);
        self.online = online;
    }

    pub fn project_id(&self) -> &str {
        &self.project.id
    }

    pub fn column(&self, status: TaskStatus) -> &[Task] {
        self.columns.get(&status).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn column_ids(&self, status: TaskStatus) -> Vec<&str> {
        self.column(status).iter().map(|t| t.id.as_str()).collect()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.columns
            .values()
            .flat_map(|column| column.iter())
            .find(|t| t.id == task_id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn online_users(&self) -> Vec<PresenceUser> {
        self.online
            .iter()
            .map(|(user_id, user_name)| PresenceUser {
                user_id: user_id.clone(),
                user_name: user_name.clone(),
            })
            .collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.typing.iter().map(String::as_str)
    }

    pub fn read_up_to(&self, user_id: &str) -> Option<i64> {
        self.read_up_to.get(user_id).copied()
    }

    // -- tasks ---------------------------------------------------------------

    fn take_task(&mut self, task_id: &str) -> Option<Task> {
        for column in self.columns.values_mut() {
            if let Some(idx) = column.iter().position(|t| t.id == task_id) {
                return Some(column.remove(idx));
            }
        }
        None
    }

    /// Insert or replace a task, keeping its column sorted by position.
    pub fn upsert_task(&mut self, task: Task) {
        self.take_task(&task.id);
        let column = self.columns.entry(task.status).or_default();
        let idx = column.partition_point(|t| t.position <= task.position);
        column.insert(idx, task);
    }

    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        self.take_task(task_id)
    }

    /// Rebuild `status` from an authoritative order. Entries for tasks this
    /// view has never seen are skipped.
    pub fn apply_order(&mut self, status: TaskStatus, order: &[TaskPosition]) {
        let mut rebuilt = Vec::with_capacity(order.len());
        for slot in order {
            if let Some(mut task) = self.take_task(&slot.task_id) {
                task.status = status;
                task.position = slot.position;
                rebuilt.push(task);
            } else {
                tracing::debug!(task_id = %slot.task_id, "order names a task missing locally");
            }
        }
        let leftovers = self.columns.insert(status, rebuilt).unwrap_or_default();
        // Anything the server no longer lists in this column has gone elsewhere
        // or was deleted; keep it visible until a later event settles it.
        let column = self.columns.entry(status).or_default();
        for task in leftovers {
            let idx = column.partition_point(|t| t.position <= task.position);
            column.insert(idx, task);
        }
    }

    pub fn apply_moved(&mut self, moved: &TaskMoved) {
        if let Some(source) = &moved.source_order {
            self.apply_order(moved.from_status, source);
        }
        self.apply_order(moved.status, &moved.order);
    }

    /// Move a task locally the way a drag-and-drop does, returning the columns
    /// as they were beforehand.
    pub fn move_local(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
    ) -> Option<Vec<ColumnBackup>> {
        let from = self.task(task_id)?.status;
        let mut backup = vec![ColumnBackup {
            status: from,
            tasks: self.column(from).to_vec(),
        }];
        if from != status {
            backup.push(ColumnBackup {
                status,
                tasks: self.column(status).to_vec(),
            });
        }

        let mut task = self.take_task(task_id)?;
        task.status = status;
        let column = self.columns.entry(status).or_default();
        column.insert(index.min(column.len()), task);
        for (position, task) in column.iter_mut().enumerate() {
            task.position = position as i32;
        }
        if from != status {
            if let Some(source) = self.columns.get_mut(&from) {
                for (position, task) in source.iter_mut().enumerate() {
                    task.position = position as i32;
                }
            }
        }
        Some(backup)
    }

    pub fn restore(&mut self, backup: Vec<ColumnBackup>) {
        for column in backup {
            for task in &column.tasks {
                self.take_task(&task.id);
            }
            self.columns.insert(column.status, column.tasks);
        }
    }

    // -- chat and presence -----------------------------------------------------

    /// Append a message unless it is already known.
    pub fn push_message(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let idx = self.messages.partition_point(|m| m.id < message.id);
        self.messages.insert(idx, message);
        true
    }

    pub fn mark_read(&mut self, user_id: &str, message_id: i64) {
        let entry = self.read_up_to.entry(user_id.to_string()).or_insert(message_id);
        *entry = (*entry).max(message_id);
    }

    pub fn set_online(&mut self, user: PresenceUser) {
        self.online.insert(user.user_id, user.user_name);
    }

    pub fn set_offline(&mut self, user_id: &str) {
        self.online.remove(user_id);
        self.typing.remove(user_id);
    }

    pub fn replace_online(&mut self, users: Vec<PresenceUser>) {
        self.online = users
            .into_iter()
            .map(|u| (u.user_id, u.user_name))
            .collect();
    }

    pub fn set_typing(&mut self, user_id: &str, is_typing: bool) {
        if is_typing {
            self.typing.insert(user_id.to_string());
        } else {
            self.typing.remove(user_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;
    use teamboard_common::model::{MessageType, TaskPriority};

    use super::*;

    pub(crate) fn task(id: &str, status: TaskStatus, position: i32) -> Task {
        Task {
            id: id.into(),
            project_id: "prj_1".into(),
            title: id.to_uppercase(),
            description: None,
            status,
            position,
            priority: TaskPriority::Medium,
            assignee_id: None,
            created_by: "usr_owner".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn message(id: i64) -> ChatMessage {
        ChatMessage {
            id,
            project_id: "prj_1".into(),
            author_id: "usr_owner".into(),
            content: format!("message {id}"),
            kind: MessageType::Text,
            file_url: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn snapshot(tasks: Vec<Task>, messages: Vec<ChatMessage>) -> Snapshot {
        Snapshot {
            project: Project {
                id: "prj_1".into(),
                name: "Board".into(),
                description: None,
                owner_id: "usr_owner".into(),
                created_at: Utc::now(),
            },
            role: ProjectRole::Member,
            members: Vec::new(),
            tasks,
            messages,
        }
    }

    fn board() -> ProjectView {
        ProjectView::from_snapshot(snapshot(
            vec![
                task("b", TaskStatus::Todo, 1),
                task("a", TaskStatus::Todo, 0),
                task("c", TaskStatus::Todo, 2),
                task("x", TaskStatus::Done, 0),
            ],
            vec![message(3), message(1), message(2)],
        ))
    }

    #[test]
    fn snapshot_is_sorted() {
        let view = board();
        assert_eq!(view.column_ids(TaskStatus::Todo), vec!["a", "b", "c"]);
        let ids: Vec<i64> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(view.column(TaskStatus::InReview).is_empty());
    }

    #[test]
    fn move_local_and_restore() {
        let mut view = board();
        let before = view.clone();

        let backup = view.move_local("c", TaskStatus::Done, 0).unwrap();
        assert_eq!(view.column_ids(TaskStatus::Done), vec!["c", "x"]);
        assert_eq!(view.column_ids(TaskStatus::Todo), vec!["a", "b"]);
        assert_eq!(view.task("x").unwrap().position, 1);

        view.restore(backup);
        assert_eq!(view.column(TaskStatus::Todo), before.column(TaskStatus::Todo));
        assert_eq!(view.column(TaskStatus::Done), before.column(TaskStatus::Done));
    }

    #[test]
    fn move_local_unknown_task_is_none() {
        let mut view = board();
        assert!(view.move_local("zzz", TaskStatus::Done, 0).is_none());
    }

    #[test]
    fn authoritative_order_wins() {
        let mut view = board();
        view.apply_moved(&TaskMoved {
            task_id: "a".into(),
            project_id: "prj_1".into(),
            from_status: TaskStatus::Todo,
            status: TaskStatus::Done,
            position: 1,
            order: vec![
                TaskPosition { task_id: "x".into(), position: 0 },
                TaskPosition { task_id: "a".into(), position: 1 },
            ],
            source_order: Some(vec![
                TaskPosition { task_id: "b".into(), position: 0 },
                TaskPosition { task_id: "c".into(), position: 1 },
            ]),
        });

        assert_eq!(view.column_ids(TaskStatus::Done), vec!["x", "a"]);
        assert_eq!(view.column_ids(TaskStatus::Todo), vec!["b", "c"]);
        assert_eq!(view.task("a").unwrap().status, TaskStatus::Done);
    }

    #[test]
    fn duplicate_messages_are_ignored() {
        let mut view = board();
        assert!(!view.push_message(message(2)));
        assert!(view.push_message(message(4)));
        assert_eq!(view.messages().len(), 4);
    }

    #[test]
    fn offline_clears_typing() {
        let mut view = board();
        view.set_online(PresenceUser {
            user_id: "usr_2".into(),
            user_name: "Two".into(),
        });
        view.set_typing("usr_2", true);
        assert_eq!(view.typing_users().collect::<Vec<_>>(), vec!["usr_2"]);

        view.set_offline("usr_2");
        assert!(!view.is_online("usr_2"));
        assert_eq!(view.typing_users().count(), 0);
    }
}
