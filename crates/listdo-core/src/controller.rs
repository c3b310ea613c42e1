//! Edit/delete flow for a single task.
//!
//! The controller owns the draft and the submission state, talks to the
//! injected [`TaskStore`] and [`Router`], and hands out [`EditTaskView`]
//! snapshots for a presentation layer to render. Every store call is bound
//! to the controller's [`Lifetime`]: once unmounted, outstanding requests are
//! abandoned and their results never touch state.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DueDatePolicy;
use crate::datetime::TimeCodec;
use crate::dialog::Confirm;
use crate::form::{Draft, TaskForm};
use crate::navigation::{ROOT_PATH, RouteParams, Router, list_path};
use crate::store::TaskStore;
use crate::task::{DeleteTaskArgs, UpdateTaskPayload};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this task?";
pub const INVALID_DUE_MESSAGE: &str = "Due date is not a valid date and time";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionState {
    pub in_flight: bool,
    pub error_message: String,
}

/// How a submit or delete attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Navigated(String),
    Failed(String),
    /// Validation refused to send the request.
    Rejected(String),
    /// The user declined the confirmation prompt.
    Declined,
    /// The form was unmounted before the request resolved.
    Cancelled,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Rejected(_))
    }
}

/// Immutable snapshot of everything the form shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditTaskView {
    pub list_id: String,
    pub task_id: String,
    pub draft: Draft,
    pub loaded: bool,
    pub in_flight: bool,
    pub error_message: String,
    /// Update and Delete triggers; off while a request is outstanding.
    pub controls_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Title(String),
    Detail(String),
    Done(bool),
    LimitLocal(String),
}

#[derive(Debug, Clone)]
pub struct Lifetime {
    alive: Arc<watch::Sender<bool>>,
}

impl Default for Lifetime {
    fn default() -> Self {
        let (alive, _) = watch::channel(true);
        Self {
            alive: Arc::new(alive),
        }
    }
}

impl Lifetime {
    pub fn handle(&self) -> UnmountHandle {
        UnmountHandle {
            alive: Arc::clone(&self.alive),
        }
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    async fn unmounted(&self) {
        let mut rx = self.alive.subscribe();
        if rx.wait_for(|alive| !*alive).await.is_err() {
            debug!("lifetime channel closed");
        }
    }

    /// Runs `request` unless the owner is unmounted first.
    async fn guard<F>(&self, request: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.unmounted() => None,
            out = request => Some(out),
        }
    }
}

/// Lets the presentation layer tear the form down while a request is out.
#[derive(Debug, Clone)]
pub struct UnmountHandle {
    alive: Arc<watch::Sender<bool>>,
}

impl UnmountHandle {
    pub fn unmount(&self) {
        let was_alive = self.alive.send_replace(false);
        if was_alive {
            info!("edit form unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        *self.alive.borrow()
    }
}

/// Submissions take `&mut self`, so at most one request per form is
/// outstanding at a time.
pub struct EditTaskController<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    router: Arc<R>,
    codec: TimeCodec,
    due_policy: DueDatePolicy,
    route: RouteParams,
    form: TaskForm,
    submission: SubmissionState,
    lifetime: Lifetime,
}

impl<S, R> EditTaskController<S, R>
where
    S: TaskStore + ?Sized,
    R: Router + ?Sized,
{
    pub fn new(store: Arc<S>, router: Arc<R>, codec: TimeCodec, route: RouteParams) -> Self {
        let form = TaskForm::new(route.task_id.clone());
        Self {
            store,
            router,
            codec,
            due_policy: DueDatePolicy::default(),
            route,
            form,
            submission: SubmissionState::default(),
            lifetime: Lifetime::default(),
        }
    }

    #[must_use]
    pub fn with_due_policy(mut self, policy: DueDatePolicy) -> Self {
        self.due_policy = policy;
        self
    }

    pub fn route(&self) -> &RouteParams {
        &self.route
    }

    pub fn submission(&self) -> &SubmissionState {
        &self.submission
    }

    pub fn unmount_handle(&self) -> UnmountHandle {
        self.lifetime.handle()
    }

    pub fn view(&self) -> EditTaskView {
        EditTaskView {
            list_id: self.route.list_id.clone(),
            task_id: self.route.task_id.clone(),
            draft: self.form.draft().clone(),
            loaded: self.form.is_hydrated(),
            in_flight: self.submission.in_flight,
            error_message: self.submission.error_message.clone(),
            controls_enabled: !self.submission.in_flight,
        }
    }

    /// Selects the list, loads its tasks, and hydrates the form.
    #[tracing::instrument(skip(self), fields(list_id = %self.route.list_id, task_id = %self.route.task_id))]
    pub async fn mount(&mut self) -> EditTaskView {
        let list_id = self.route.list_id.clone();
        let store = Arc::clone(&self.store);
        let loaded = self
            .lifetime
            .guard(async {
                store.set_current_list_context(&list_id).await?;
                store.load_tasks_for_list(&list_id).await
            })
            .await;

        match loaded {
            None => {
                info!("unmounted while loading tasks");
                return self.view();
            }
            Some(Ok(())) => {}
            Some(Err(err)) => {
                warn!(error = %err, "failed to load tasks");
                self.submission.error_message = err.message();
            }
        }

        self.sync_from_store();
        self.view()
    }

    /// Hydrates from the store's cached collection. Returns `true` only on
    /// the first hydration for the current task.
    pub fn sync_from_store(&mut self) -> bool {
        let tasks = self.store.cached_tasks();
        self.form.hydrate(&tasks, &self.codec)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_route(&mut self, route: RouteParams) -> EditTaskView {
        if route == self.route {
            return self.view();
        }

        let list_changed = route.list_id != self.route.list_id;
        self.form.retarget(&route.task_id);
        self.route = route;

        if list_changed {
            self.mount().await
        } else {
            self.sync_from_store();
            self.view()
        }
    }

    pub fn apply_edit(&mut self, edit: FieldEdit) -> EditTaskView {
        match edit {
            FieldEdit::Title(title) => self.form.set_title(title),
            FieldEdit::Detail(detail) => self.form.set_detail(detail),
            FieldEdit::Done(done) => self.form.set_done(done),
            FieldEdit::LimitLocal(limit) => self.form.set_limit_local(limit),
        }
        self.view()
    }

    fn build_update_payload(&self) -> Result<UpdateTaskPayload, String> {
        let draft = self.form.draft();
        let mut payload = UpdateTaskPayload {
            id: self.route.task_id.clone(),
            title: draft.title.clone(),
            detail: draft.detail.clone(),
            done: draft.done,
            limit: None,
        };

        if !draft.limit_local.is_empty() {
            match self.codec.to_utc_string(&draft.limit_local) {
                Some(utc) => payload.limit = Some(utc),
                None if self.due_policy == DueDatePolicy::Reject => {
                    return Err(INVALID_DUE_MESSAGE.to_string());
                }
                None => {
                    warn!(
                        limit_local = %draft.limit_local,
                        "due date did not parse; sending update without it"
                    );
                }
            }
        }

        Ok(payload)
    }

    #[tracing::instrument(skip(self), fields(list_id = %self.route.list_id, task_id = %self.route.task_id))]
    pub async fn submit_update(&mut self) -> Outcome {
        if !self.lifetime.is_alive() {
            return Outcome::Cancelled;
        }
        if !self.form.is_hydrated() {
            warn!("submitting before the task was loaded");
        }

        self.submission.in_flight = true;
        let payload = match self.build_update_payload() {
            Ok(payload) => payload,
            Err(message) => {
                self.submission.in_flight = false;
                self.submission.error_message = message.clone();
                return Outcome::Rejected(message);
            }
        };

        debug!(has_limit = payload.limit.is_some(), "dispatching update");
        let Some(result) = self.lifetime.guard(self.store.update_task(&payload)).await else {
            info!("unmounted before update resolved; dropping result");
            return Outcome::Cancelled;
        };

        self.submission.in_flight = false;
        match result {
            Ok(_) => self.navigate_away(list_path(&self.route.list_id)),
            Err(err) => self.fail(err.message()),
        }
    }

    #[tracing::instrument(skip(self, confirm), fields(list_id = %self.route.list_id, task_id = %self.route.task_id))]
    pub async fn submit_delete(&mut self, confirm: &dyn Confirm) -> Outcome {
        if !self.lifetime.is_alive() {
            return Outcome::Cancelled;
        }
        if !confirm.confirm(DELETE_PROMPT) {
            info!("delete declined");
            return Outcome::Declined;
        }

        self.submission.in_flight = true;
        let args = DeleteTaskArgs {
            id: self.route.task_id.clone(),
        };
        let Some(result) = self.lifetime.guard(self.store.delete_task(&args)).await else {
            info!("unmounted before delete resolved; dropping result");
            return Outcome::Cancelled;
        };

        self.submission.in_flight = false;
        match result {
            Ok(()) => self.navigate_away(ROOT_PATH.to_string()),
            Err(err) => self.fail(err.message()),
        }
    }

    /// Leaves the form without saving.
    pub fn cancel(&mut self) -> Outcome {
        if !self.lifetime.is_alive() {
            return Outcome::Cancelled;
        }
        info!("edit cancelled");
        self.navigate_away(ROOT_PATH.to_string())
    }

    /// Tears the form down; outstanding requests resolve as cancelled.
    pub fn unmount(&mut self) {
        self.lifetime.handle().unmount();
        self.form.reset();
    }

    fn navigate_away(&mut self, path: String) -> Outcome {
        self.router.navigate(&path);
        self.form.reset();
        Outcome::Navigated(path)
    }

    fn fail(&mut self, message: String) -> Outcome {
        warn!(error = %message, "request failed");
        self.submission.error_message = message.clone();
        Outcome::Failed(message)
    }
}
