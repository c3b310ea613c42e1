use serde::Serialize;

use crate::datetime::TimeCodec;
use crate::task::Task;

/// Editable copy of a task's fields.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
)]
pub struct Draft {
  pub title:       String,
  pub detail:      String,
  pub done:        bool,
  /// Empty, or `YYYY-MM-DDTHH:MM` in
  /// viewer time.
  pub limit_local: String
}

impl Draft {
  #[must_use]
  pub fn from_task(
    task: &Task,
    codec: &TimeCodec
  ) -> Self {
    Self {
      title:       task.title.clone(),
      detail:      task.detail.clone(),
      done:        task.done,
      limit_local: codec
        .to_local_input_string(
          task.limit
        )
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskForm {
  task_id:      String,
  draft:        Draft,
  hydrated_for: Option<String>
}

impl TaskForm {
  pub fn new(
    task_id: impl Into<String>
  ) -> Self {
    Self {
      task_id:      task_id.into(),
      draft:        Draft::default(),
      hydrated_for: None
    }
  }

  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  pub fn draft(&self) -> &Draft {
    &self.draft
  }

  pub fn is_hydrated(&self) -> bool {
    self.hydrated_for.as_deref()
      == Some(self.task_id.as_str())
  }

  /// Points the form at another task.
  /// The next [`TaskForm::hydrate`] will
  /// copy that task in.
  pub fn retarget(
    &mut self,
    task_id: &str
  ) {
    if self.task_id == task_id {
      return;
    }
    tracing::debug!(
      from = %self.task_id,
      to = %task_id,
      "retargeting task form"
    );
    self.task_id = task_id.to_string();
    self.draft = Draft::default();
    self.hydrated_for = None;
  }

  /// Copies the target task into the
  /// draft the first time it shows up in
  /// `tasks`. Later calls for the same id
  /// leave in-progress edits alone.
  #[tracing::instrument(skip(self, tasks, codec), fields(task_id = %self.task_id))]
  pub fn hydrate(
    &mut self,
    tasks: &[Task],
    codec: &TimeCodec
  ) -> bool {
    if self.is_hydrated() {
      return false;
    }

    let Some(task) = tasks
      .iter()
      .find(|task| task.id == self.task_id)
    else {
      tracing::trace!(
        available = tasks.len(),
        "target task not loaded yet"
      );
      return false;
    };

    self.draft =
      Draft::from_task(task, codec);
    self.hydrated_for =
      Some(task.id.clone());
    tracing::debug!("hydrated draft");
    true
  }

  pub fn set_title(
    &mut self,
    title: impl Into<String>
  ) {
    self.draft.title = title.into();
  }

  pub fn set_detail(
    &mut self,
    detail: impl Into<String>
  ) {
    self.draft.detail = detail.into();
  }

  pub fn set_done(&mut self, done: bool) {
    self.draft.done = done;
  }

  pub fn set_limit_local(
    &mut self,
    limit_local: impl Into<String>
  ) {
    self.draft.limit_local =
      limit_local.into();
  }

  /// Drops the draft, e.g. after
  /// navigating away.
  pub fn reset(&mut self) {
    self.draft = Draft::default();
    self.hydrated_for = None;
  }
}
