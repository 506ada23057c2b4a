//! Request/response side of the client: snapshot hydration and task moves.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use teamboard_common::model::{ChatMessage, Member, Page, Project, ProjectRole, Task, TaskStatus};
use teamboard_common::protocol::TaskMoved;

use crate::error::{ClientError, ClientResult};

/// Everything a controller needs to render a project from scratch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub project: Project,
    pub role: ProjectRole,
    pub members: Vec<Member>,
    pub tasks: Vec<Task>,
    /// Newest first, as the history endpoint returns them.
    pub messages: Vec<ChatMessage>,
}

#[async_trait]
pub trait Hydrator: Send + Sync {
    async fn snapshot(&self, project_id: &str) -> ClientResult<Snapshot>;

    /// Ask the server to move a task. `connection_id` suppresses the echo on
    /// the caller's own socket.
    async fn move_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
        connection_id: Option<&str>,
    ) -> ClientResult<TaskMoved>;
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    project: Project,
    members: Vec<Member>,
    role: ProjectRole,
}

#[derive(Debug, Serialize)]
struct MoveRequest {
    status: TaskStatus,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MoveResponse {
    moved: TaskMoved,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

const CONNECTION_ID_HEADER: &str = "X-Connection-Id";
const PAGE_SIZE: usize = 100;

/// [`Hydrator`] backed by the board REST API.
#[derive(Debug, Clone)]
pub struct RestHydrator {
    http: reqwest::Client,
    base_url: String,
    token: String,
    message_budget: usize,
}

impl RestHydrator {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            message_budget: 200,
        }
    }

    /// Cap on how much chat history one hydration pulls.
    pub fn with_message_budget(mut self, budget: usize) -> Self {
        self.message_budget = budget;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        decode(response).await
    }

    async fn recent_messages(&self, project_id: &str) -> ClientResult<Vec<ChatMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        while messages.len() < self.message_budget {
            let limit = PAGE_SIZE.min(self.message_budget - messages.len());
            let mut query = vec![("limit", limit.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page: Page<ChatMessage> = self
                .send(
                    self.http
                        .get(self.url(&format!("/projects/{project_id}/messages")))
                        .query(&query),
                )
                .await?;

            messages.extend(page.data);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }
        Ok(messages)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error.code, body.error.message),
        Err(_) => ("UNKNOWN".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl Hydrator for RestHydrator {
    async fn snapshot(&self, project_id: &str) -> ClientResult<Snapshot> {
        let project: ProjectResponse = self
            .send(self.http.get(self.url(&format!("/projects/{project_id}"))))
            .await?;
        let tasks: Vec<Task> = self
            .send(self.http.get(self.url(&format!("/projects/{project_id}/tasks"))))
            .await?;
        let messages = self.recent_messages(project_id).await?;

        tracing::debug!(
            %project_id,
            tasks = tasks.len(),
            messages = messages.len(),
            "hydrated project"
        );

        Ok(Snapshot {
            project: project.project,
            role: project.role,
            members: project.members,
            tasks,
            messages,
        })
    }

    async fn move_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        index: usize,
        connection_id: Option<&str>,
    ) -> ClientResult<TaskMoved> {
        let mut request = self
            .http
            .put(self.url(&format!("/tasks/{task_id}/move")))
            .json(&MoveRequest { status, index });
        if let Some(connection_id) = connection_id {
            request = request.header(CONNECTION_ID_HEADER, connection_id);
        }
        let response: MoveResponse = self.send(request).await?;
        Ok(response.moved)
    }
}
