use std::io;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, TaskRef};
use crate::config::Config;
use crate::controller::{EditTaskController, FieldEdit, Outcome, UnmountHandle};
use crate::datetime::{TimeCodec, resolve_viewer_timezone};
use crate::dialog::{Confirm, PresetConfirm, TerminalConfirm};
use crate::navigation::{HistoryRouter, RouteParams, task_path};
use crate::render::Renderer;
use crate::store::TaskStore;

#[instrument(skip(store, cfg, renderer))]
pub async fn dispatch<S>(
    store: Arc<S>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()>
where
    S: TaskStore + ?Sized,
{
    let codec = TimeCodec::new(resolve_viewer_timezone(cfg.timezone().as_deref()));
    let due_policy = cfg.due_policy()?;
    debug!(timezone = %codec.timezone(), ?due_policy, "resolved form settings");

    let open = |task: &TaskRef| {
        let route = RouteParams::new(task.list_id.clone(), task.task_id.clone());
        let router = Arc::new(HistoryRouter::new(task_path(&route.list_id, &route.task_id)));
        EditTaskController::new(Arc::clone(&store), router, codec, route).with_due_policy(due_policy)
    };

    match command {
        Command::Show { task, json } => {
            let mut controller = open(&task);
            let view = controller.mount().await;
            if json {
                renderer.print_view_json(&view)?;
            } else {
                renderer.print_view(&view)?;
            }
            Ok(())
        }
        Command::Edit {
            task,
            title,
            detail,
            done,
            not_done,
            due,
            clear_due,
        } => {
            let mut controller = open(&task);
            let view = controller.mount().await;
            if !view.loaded {
                if view.error_message.is_empty() {
                    bail!("task {} not found in list {}", task.task_id, task.list_id);
                }
                bail!("could not load task: {}", view.error_message);
            }

            let mut edits = Vec::new();
            edits.extend(title.map(FieldEdit::Title));
            edits.extend(detail.map(FieldEdit::Detail));
            if done {
                edits.push(FieldEdit::Done(true));
            } else if not_done {
                edits.push(FieldEdit::Done(false));
            }
            if clear_due {
                edits.push(FieldEdit::LimitLocal(String::new()));
            } else if let Some(due) = due {
                edits.push(FieldEdit::LimitLocal(due));
            }
            info!(count = edits.len(), "applying field edits");
            for edit in edits {
                controller.apply_edit(edit);
            }

            let _interrupt = InterruptGuard::watch(controller.unmount_handle());
            let outcome = controller.submit_update().await;
            finish(renderer, &outcome)
        }
        Command::Delete { task, yes } => {
            let mut controller = open(&task);
            let view = controller.mount().await;
            if !view.error_message.is_empty() {
                warn!(error = %view.error_message, "continuing delete without loaded task");
            }

            let confirm: Box<dyn Confirm> = if yes {
                Box::new(PresetConfirm(true))
            } else {
                Box::new(TerminalConfirm::new(io::stdin().lock(), io::stderr()))
            };
            let _interrupt = InterruptGuard::watch(controller.unmount_handle());
            let outcome = controller.submit_delete(confirm.as_ref()).await;
            finish(renderer, &outcome)
        }
    }
}

/// Unmounts the form on Ctrl-C for as long as it is alive.
struct InterruptGuard {
    watcher: tokio::task::JoinHandle<()>,
}

impl InterruptGuard {
    fn watch(handle: UnmountHandle) -> Self {
        Self {
            watcher: tokio::spawn(unmount_on_ctrl_c(handle)),
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn unmount_on_ctrl_c(handle: UnmountHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupted; abandoning request");
            handle.unmount();
        }
        Err(err) => debug!(error = %err, "ctrl-c listener unavailable"),
    }
}

fn finish(renderer: &Renderer, outcome: &Outcome) -> anyhow::Result<()> {
    match outcome {
        Outcome::Failed(message) | Outcome::Rejected(message) => Err(anyhow!("{message}")),
        Outcome::Cancelled => Err(anyhow!("request abandoned")),
        _ => renderer.print_outcome(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryTaskStore, StoreCall};
    use crate::task::Task;

    fn config() -> Config {
        let mut cfg = Config::defaults();
        cfg.apply_overrides([("timezone".to_string(), "UTC".to_string())]);
        cfg
    }

    #[tokio::test]
    async fn edit_command_submits_changes() {
        let store = Arc::new(InMemoryTaskStore::with_list("l1", vec![Task::new("t1", "Old")]));
        let command = Command::Edit {
            task: TaskRef {
                list_id: "l1".to_string(),
                task_id: "t1".to_string(),
            },
            title: Some("New".to_string()),
            detail: None,
            done: true,
            not_done: false,
            due: Some("2024-03-01T10:00".to_string()),
            clear_due: false,
        };

        dispatch(Arc::clone(&store), &config(), &Renderer::plain(), command)
            .await
            .expect("edit succeeds");

        let task = &store.tasks_in("l1")[0];
        assert_eq!(task.title, "New");
        assert!(task.done);
        assert_eq!(
            task.limit.map(|l| l.to_rfc3339()),
            Some("2024-03-01T10:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn edit_command_refuses_missing_task() {
        let store = Arc::new(InMemoryTaskStore::with_list("l1", vec![]));
        let command = Command::Edit {
            task: TaskRef {
                list_id: "l1".to_string(),
                task_id: "nope".to_string(),
            },
            title: Some("New".to_string()),
            detail: None,
            done: false,
            not_done: false,
            due: None,
            clear_due: false,
        };

        let err = dispatch(Arc::clone(&store), &config(), &Renderer::plain(), command)
            .await
            .expect_err("missing task");
        assert!(err.to_string().contains("not found"));
        assert!(
            !store
                .calls()
                .iter()
                .any(|call| matches!(call, StoreCall::Update(_)))
        );
    }

    #[tokio::test]
    async fn delete_command_with_yes_removes_task() {
        let store = Arc::new(InMemoryTaskStore::with_list("l1", vec![Task::new("t1", "Old")]));
        let command = Command::Delete {
            task: TaskRef {
                list_id: "l1".to_string(),
                task_id: "t1".to_string(),
            },
            yes: true,
        };

        dispatch(Arc::clone(&store), &config(), &Renderer::plain(), command)
            .await
            .expect("delete succeeds");
        assert!(store.tasks_in("l1").is_empty());
    }
}
