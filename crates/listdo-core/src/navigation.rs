use parking_lot::Mutex;
use tracing::info;

pub const ROOT_PATH: &str = "/";

#[must_use]
pub fn list_path(list_id: &str) -> String {
    format!("/lists/{list_id}")
}

#[must_use]
pub fn task_path(list_id: &str, task_id: &str) -> String {
    format!("/lists/{list_id}/tasks/{task_id}")
}

/// Parameters of the `/lists/{listId}/tasks/{taskId}` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParams {
    pub list_id: String,
    pub task_id: String,
}

impl RouteParams {
    pub fn new(list_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            list_id: list_id.into(),
            task_id: task_id.into(),
        }
    }

    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.trim_matches('/').split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("lists"), Some(list_id), Some("tasks"), Some(task_id), None)
                if !list_id.is_empty() && !task_id.is_empty() =>
            {
                Some(Self::new(list_id, task_id))
            }
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        task_path(&self.list_id, &self.task_id)
    }
}

pub trait Router: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Router that keeps every visited path, newest last.
#[derive(Debug, Default)]
pub struct HistoryRouter {
    entries: Mutex<Vec<String>>,
}

impl HistoryRouter {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(vec![initial.into()]),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.entries.lock().last().cloned()
    }

    pub fn history(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

impl Router for HistoryRouter {
    fn navigate(&self, path: &str) {
        info!(path, "navigating");
        self.entries.lock().push(path.to_string());
    }
}
