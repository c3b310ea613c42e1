use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{StoreError, StoreResult, TaskStore};
use crate::task::{DeleteTaskArgs, Task, UpdateTaskPayload};

/// Every call the store has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    SetCurrentList(String),
    LoadTasks(String),
    Update(UpdateTaskPayload),
    Delete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Load,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    lists: HashMap<String, Vec<Task>>,
    current_list: Option<String>,
    cache: Vec<Task>,
    failures: VecDeque<(Op, StoreError)>,
    calls: Vec<StoreCall>,
}

impl Inner {
    fn take_failure(&mut self, op: Op) -> Option<StoreError> {
        let idx = self.failures.iter().position(|(o, _)| *o == op)?;
        self.failures.remove(idx).map(|(_, err)| err)
    }

    fn current_tasks_mut(&mut self) -> StoreResult<&mut Vec<Task>> {
        let list_id = self.current_list.clone().ok_or(StoreError::NoListContext)?;
        Ok(self.lists.entry(list_id).or_default())
    }
}

/// Store backed by process memory. Failures can be queued per operation.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(list_id: impl Into<String>, tasks: Vec<Task>) -> Self {
        let store = Self::new();
        store.put_list(list_id, tasks);
        store
    }

    /// Replaces a list's backing tasks without touching the cache.
    pub fn put_list(&self, list_id: impl Into<String>, tasks: Vec<Task>) {
        self.inner.lock().lists.insert(list_id.into(), tasks);
    }

    pub fn tasks_in(&self, list_id: &str) -> Vec<Task> {
        self.inner.lock().lists.get(list_id).cloned().unwrap_or_default()
    }

    pub fn current_list(&self) -> Option<String> {
        self.inner.lock().current_list.clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.clone()
    }

    pub fn fail_next_load(&self, err: StoreError) {
        self.inner.lock().failures.push_back((Op::Load, err));
    }

    pub fn fail_next_update(&self, err: StoreError) {
        self.inner.lock().failures.push_back((Op::Update, err));
    }

    pub fn fail_next_delete(&self, err: StoreError) {
        self.inner.lock().failures.push_back((Op::Delete, err));
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn set_current_list_context(&self, list_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::SetCurrentList(list_id.to_string()));
        if inner.current_list.as_deref() != Some(list_id) {
            inner.cache.clear();
        }
        inner.current_list = Some(list_id.to_string());
        Ok(())
    }

    async fn load_tasks_for_list(&self, list_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::LoadTasks(list_id.to_string()));
        if let Some(err) = inner.take_failure(Op::Load) {
            return Err(err);
        }
        let tasks = inner.lists.get(list_id).cloned().unwrap_or_default();
        debug!(list_id, count = tasks.len(), "loaded tasks into cache");
        inner.cache = tasks;
        Ok(())
    }

    fn cached_tasks(&self) -> Vec<Task> {
        self.inner.lock().cache.clone()
    }

    async fn update_task(&self, payload: &UpdateTaskPayload) -> StoreResult<Task> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Update(payload.clone()));
        if let Some(err) = inner.take_failure(Op::Update) {
            return Err(err);
        }

        let tasks = inner.current_tasks_mut()?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == payload.id)
            .ok_or_else(|| StoreError::NotFound(payload.id.clone()))?;
        task.apply_update(payload);
        let updated = task.clone();

        if let Some(cached) = inner.cache.iter_mut().find(|task| task.id == updated.id) {
            *cached = updated.clone();
        }
        Ok(updated)
    }

    async fn delete_task(&self, args: &DeleteTaskArgs) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.push(StoreCall::Delete(args.id.clone()));
        if let Some(err) = inner.take_failure(Op::Delete) {
            return Err(err);
        }

        let tasks = inner.current_tasks_mut()?;
        let before = tasks.len();
        tasks.retain(|task| task.id != args.id);
        if tasks.len() == before {
            return Err(StoreError::NotFound(args.id.clone()));
        }
        inner.cache.retain(|task| task.id != args.id);
        Ok(())
    }
}
