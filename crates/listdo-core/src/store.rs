//! Task store port. The form never talks to the backend directly; it goes
//! through a [`TaskStore`], which also keeps the cached task collection the
//! form hydrates from.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::{DeleteTaskArgs, Task, UpdateTaskPayload};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Records which list's tasks are in scope for later calls.
    async fn set_current_list_context(&self, list_id: &str) -> StoreResult<()>;

    /// Fetches the list's tasks into the cache.
    async fn load_tasks_for_list(&self, list_id: &str) -> StoreResult<()>;

    /// Snapshot of the cached collection.
    fn cached_tasks(&self) -> Vec<Task>;

    async fn update_task(&self, payload: &UpdateTaskPayload) -> StoreResult<Task>;

    async fn delete_task(&self, args: &DeleteTaskArgs) -> StoreResult<()>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no list selected")]
    NoListContext,

    #[error("task not found: {0}")]
    NotFound(String),

    /// The backend answered with an error; `message` is shown verbatim.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Human-readable text for the form's error region.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
