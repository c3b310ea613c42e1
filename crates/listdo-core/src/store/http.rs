use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{
  Method,
  StatusCode,
  Url
};
use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Deserializer
};
use tracing::{
  debug,
  info,
  warn
};

use super::{
  StoreError,
  StoreResult,
  TaskStore
};
use crate::config::ApiSettings;
use crate::task::{
  DeleteTaskArgs,
  Task,
  UpdateTaskBody,
  UpdateTaskPayload,
  parse_limit
};

#[derive(Debug, Default)]
struct CacheState {
  current_list: Option<String>,
  tasks:        Vec<Task>
}

/// JSON-over-HTTP task store.
#[derive(Debug)]
pub struct HttpTaskStore {
  client:   reqwest::Client,
  base_url: Url,
  token:    Option<String>,
  state:    RwLock<CacheState>
}

impl HttpTaskStore {
  pub fn new(
    settings: &ApiSettings
  ) -> anyhow::Result<Self> {
    let base_url =
      Url::parse(&settings.base_url)
        .with_context(|| {
          format!(
            "invalid api.base_url: {}",
            settings.base_url
          )
        })?;
    if base_url.cannot_be_a_base() {
      anyhow::bail!(
        "api.base_url cannot be used \
         as a base: {base_url}"
      );
    }

    let client =
      reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .context(
          "failed building HTTP client \
           for task store"
        )?;

    info!(
      base_url = %base_url,
      authenticated = settings.token.is_some(),
      "task store configured"
    );

    Ok(Self {
      client,
      base_url,
      token: settings.token.clone(),
      state: RwLock::new(
        CacheState::default()
      )
    })
  }

  fn current_list(
    &self
  ) -> StoreResult<String> {
    self
      .state
      .read()
      .current_list
      .clone()
      .ok_or(StoreError::NoListContext)
  }

  fn endpoint(
    &self,
    segments: &[&str]
  ) -> StoreResult<Url> {
    endpoint_url(&self.base_url, segments)
  }

  #[tracing::instrument(skip_all, fields(method = %method, url = %url))]
  async fn send(
    &self,
    method: Method,
    url: Url,
    body: Option<String>
  ) -> StoreResult<String> {
    let mut request = self
      .client
      .request(method, url.clone())
      .header(
        reqwest::header::ACCEPT,
        "application/json"
      );
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request
        .header(
          reqwest::header::CONTENT_TYPE,
          "application/json"
        )
        .body(body);
    }

    let response =
      request.send().await.map_err(
        |err| {
          warn!(error = %err, "task store request failed");
          StoreError::Transport(
            err.to_string()
          )
        }
      )?;

    let status = response.status();
    let text =
      response.text().await.map_err(
        |err| {
          StoreError::Transport(format!(
            "failed reading response \
             body: {err}"
          ))
        }
      )?;

    if status.is_success() {
      debug!(status = %status, bytes = text.len(), "task store response");
      return Ok(text);
    }

    let message =
      extract_error_message(status, &text);
    warn!(status = %status, message = %message, "task store rejected request");
    Err(StoreError::Remote {
      status: status.as_u16(),
      message
    })
  }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
  async fn set_current_list_context(
    &self,
    list_id: &str
  ) -> StoreResult<()> {
    let mut state = self.state.write();
    if state.current_list.as_deref()
      != Some(list_id)
    {
      state.tasks.clear();
    }
    state.current_list =
      Some(list_id.to_string());
    Ok(())
  }

  async fn load_tasks_for_list(
    &self,
    list_id: &str
  ) -> StoreResult<()> {
    let url = self
      .endpoint(&["lists", list_id, "tasks"])?;
    let body =
      self.send(Method::GET, url, None).await?;
    let tasks = parse_task_list(&body)?;
    debug!(list_id, count = tasks.len(), "loaded tasks");

    let mut state = self.state.write();
    if state.current_list.as_deref()
      == Some(list_id)
    {
      state.tasks = tasks;
    } else {
      warn!(
        list_id,
        "list context changed while \
         loading; discarding tasks"
      );
    }
    Ok(())
  }

  fn cached_tasks(&self) -> Vec<Task> {
    self.state.read().tasks.clone()
  }

  async fn update_task(
    &self,
    payload: &UpdateTaskPayload
  ) -> StoreResult<Task> {
    let list_id = self.current_list()?;
    let url = self.endpoint(&[
      "lists",
      &list_id,
      "tasks",
      &payload.id
    ])?;
    let body = serde_json::to_string(
      &UpdateTaskBody::from(payload)
    )
    .map_err(|err| {
      StoreError::Decode(err.to_string())
    })?;

    let response = self
      .send(Method::PUT, url, Some(body))
      .await?;

    let patch =
      parse_task_patch(&payload.id, &response);

    let mut state = self.state.write();
    let mut updated = state
      .tasks
      .iter()
      .find(|task| task.id == payload.id)
      .cloned()
      .unwrap_or_else(|| {
        Task::new(payload.id.clone(), "")
      });
    updated.apply_update(payload);
    if let Some(patch) = patch {
      patch.overlay(&mut updated);
    }

    if let Some(slot) = state
      .tasks
      .iter_mut()
      .find(|task| task.id == updated.id)
    {
      *slot = updated.clone();
    }
    Ok(updated)
  }

  async fn delete_task(
    &self,
    args: &DeleteTaskArgs
  ) -> StoreResult<()> {
    let list_id = self.current_list()?;
    let url = self.endpoint(&[
      "lists", &list_id, "tasks", &args.id
    ])?;
    self
      .send(Method::DELETE, url, None)
      .await?;

    self
      .state
      .write()
      .tasks
      .retain(|task| task.id != args.id);
    Ok(())
  }
}

fn endpoint_url(
  base: &Url,
  segments: &[&str]
) -> StoreResult<Url> {
  let mut url = base.clone();
  url
    .path_segments_mut()
    .map_err(|()| {
      StoreError::Transport(format!(
        "base url cannot hold a path: \
         {base}"
      ))
    })?
    .pop_if_empty()
    .extend(segments);
  Ok(url)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskListBody {
  Bare(Vec<Task>),
  Wrapped { tasks: Vec<Task> }
}

fn parse_task_list(
  body: &str
) -> StoreResult<Vec<Task>> {
  match serde_json::from_str::<TaskListBody>(
    body
  ) {
    | Ok(TaskListBody::Bare(tasks))
    | Ok(TaskListBody::Wrapped {
      tasks
    }) => Ok(tasks),
    | Err(err) => {
      Err(StoreError::Decode(format!(
        "task list: {err}"
      )))
    }
  }
}

/// Fields a PUT response chose to echo
/// back. Absent fields keep the value
/// the payload produced.
#[derive(Debug, Default, Deserialize)]
struct TaskPatch {
  #[serde(default)]
  id:     Option<String>,
  #[serde(default)]
  title:  Option<String>,
  #[serde(default)]
  detail: Option<String>,
  #[serde(default)]
  done:   Option<bool>,
  #[serde(
    default,
    deserialize_with = "present_limit"
  )]
  limit:  Option<Option<DateTime<Utc>>>
}

impl TaskPatch {
  fn overlay(self, task: &mut Task) {
    if let Some(title) = self.title {
      task.title = title;
    }
    if let Some(detail) = self.detail {
      task.detail = detail;
    }
    if let Some(done) = self.done {
      task.done = done;
    }
    if let Some(limit) = self.limit {
      task.limit = limit;
    }
  }
}

fn present_limit<'de, D>(
  deserializer: D
) -> Result<
  Option<Option<DateTime<Utc>>>,
  D::Error
>
where
  D: Deserializer<'de>
{
  let raw = Option::<String>::deserialize(
    deserializer
  )?;
  Ok(Some(
    raw.as_deref().and_then(parse_limit)
  ))
}

fn parse_task_patch(
  task_id: &str,
  body: &str
) -> Option<TaskPatch> {
  if body.trim().is_empty() {
    debug!(
      "empty update response; keeping \
       payload values"
    );
    return None;
  }

  match serde_json::from_str::<TaskPatch>(
    body
  ) {
    | Ok(patch)
      if patch
        .id
        .as_deref()
        .is_some_and(|id| id != task_id) =>
    {
      warn!(
        expected = task_id,
        got = ?patch.id,
        "update response names another \
         task; ignoring it"
      );
      None
    }
    | Ok(patch) => Some(patch),
    | Err(err) => {
      debug!(error = %err, "update response is not a task; keeping payload values");
      None
    }
  }
}

const ERROR_MESSAGE_KEYS: [&str; 4] = [
  "message",
  "ErrorMessageEN",
  "ErrorMessageJP",
  "error"
];

fn extract_error_message(
  status: StatusCode,
  body: &str
) -> String {
  if let Ok(value) =
    serde_json::from_str::<serde_json::Value>(
      body
    )
  {
    let found =
      ERROR_MESSAGE_KEYS.iter().find_map(
        |key| {
          value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        }
      );
    if let Some(message) = found {
      return message.to_string();
    }
  }

  let trimmed = body.trim();
  let detail = if trimmed.is_empty() {
    status
      .canonical_reason()
      .unwrap_or("request failed")
  } else {
    trimmed
  };
  format!("HTTP {}: {detail}", status.as_u16())
}

#[cfg(test)]
mod tests {
  use std::io::{
    BufRead,
    BufReader,
    Read,
    Write
  };
  use std::net::{
    TcpListener,
    TcpStream
  };
  use std::sync::mpsc;
  use std::thread;
  use std::time::Duration;

  use chrono::TimeZone;

  use super::*;

  const LIST_BODY: &str = r#"[
    {"id":"t1","title":"Buy milk","detail":"2 litres","done":false,"limit":"2024-03-01T01:00:00Z"},
    {"id":"t2","title":"Walk dog","detail":null}
  ]"#;

  /// Loopback server answering one
  /// connection per scripted reply. Each
  /// raw request comes back lowercased.
  fn serve(
    replies: Vec<(u16, &'static str)>
  ) -> (String, mpsc::Receiver<String>) {
    let listener =
      TcpListener::bind("127.0.0.1:0")
        .expect("bind loopback");
    let addr = listener
      .local_addr()
      .expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
      for (status, body) in replies {
        let Ok((mut stream, _)) =
          listener.accept()
        else {
          return;
        };
        let request =
          read_request(&mut stream);
        let reply = format!(
          "HTTP/1.1 {status} Scripted\r\n\
           content-type: application/json\r\n\
           content-length: {}\r\n\
           connection: close\r\n\r\n{body}",
          body.len()
        );
        let _ =
          stream.write_all(reply.as_bytes());
        let _ = tx.send(request);
      }
    });
    (format!("http://{addr}/api"), rx)
  }

  fn read_request(
    stream: &mut TcpStream
  ) -> String {
    let mut reader = BufReader::new(stream);
    let mut request = String::new();
    let mut content_length = 0;
    loop {
      let mut line = String::new();
      let read = reader
        .read_line(&mut line)
        .expect("read request line");
      if read == 0 || line == "\r\n" {
        break;
      }
      if let Some((name, value)) =
        line.split_once(':')
        && name.eq_ignore_ascii_case(
          "content-length"
        )
      {
        content_length = value
          .trim()
          .parse()
          .expect("content length");
      }
      request.push_str(&line);
    }
    let mut body = vec![0; content_length];
    reader
      .read_exact(&mut body)
      .expect("read request body");
    request.push_str(
      &String::from_utf8_lossy(&body)
    );
    request.to_ascii_lowercase()
  }

  fn next_request(
    rx: &mpsc::Receiver<String>
  ) -> String {
    rx.recv_timeout(Duration::from_secs(5))
      .expect("server saw request")
  }

  async fn loaded_store(
    base_url: String
  ) -> HttpTaskStore {
    let store =
      HttpTaskStore::new(&ApiSettings {
        base_url,
        token: Some("secret".to_string()),
        timeout: Duration::from_secs(5)
      })
      .expect("build store");
    store
      .set_current_list_context("l1")
      .await
      .expect("select list");
    store
      .load_tasks_for_list("l1")
      .await
      .expect("load list");
    store
  }

  fn payload(
    title: &str,
    detail: &str,
    done: bool,
    limit: Option<&str>
  ) -> UpdateTaskPayload {
    UpdateTaskPayload {
      id: "t1".to_string(),
      title: title.to_string(),
      detail: detail.to_string(),
      done,
      limit: limit.map(str::to_string)
    }
  }

  fn original_limit() -> Option<DateTime<Utc>> {
    Utc
      .with_ymd_and_hms(2024, 3, 1, 1, 0, 0)
      .single()
  }

  #[tokio::test]
  async fn load_sends_get_with_bearer_token() {
    let (base, rx) =
      serve(vec![(200, LIST_BODY)]);
    let store = loaded_store(base).await;

    let request = next_request(&rx);
    assert!(request.starts_with(
      "get /api/lists/l1/tasks http/1.1"
    ));
    assert!(request.contains(
      "authorization: bearer secret"
    ));
    assert!(request
      .contains("accept: application/json"));

    let cached = store.cached_tasks();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].limit, original_limit());
    assert_eq!(cached[1].detail, "");
  }

  #[tokio::test]
  async fn partial_update_response_keeps_payload_fields() {
    let (base, rx) = serve(vec![
      (200, LIST_BODY),
      (200, r#"{"id":"t1","title":"New"}"#)
    ]);
    let store = loaded_store(base).await;

    let updated = store
      .update_task(&payload(
        "New", "2 litres", true, None
      ))
      .await
      .expect("update");

    assert_eq!(updated.title, "New");
    assert_eq!(updated.detail, "2 litres");
    assert!(updated.done);
    assert_eq!(updated.limit, original_limit());
    assert_eq!(store.cached_tasks()[0], updated);

    next_request(&rx);
    let put = next_request(&rx);
    assert!(put.starts_with(
      "put /api/lists/l1/tasks/t1 http/1.1"
    ));
    assert!(put.contains(
      "authorization: bearer secret"
    ));
    assert!(put.contains(
      "content-type: application/json"
    ));
    assert!(put.contains(r#""done":true"#));
    assert!(!put.contains(r#""id""#));
    assert!(!put.contains(r#""limit""#));
  }

  #[tokio::test]
  async fn empty_update_response_applies_payload() {
    let (base, _rx) = serve(vec![
      (200, LIST_BODY),
      (200, "")
    ]);
    let store = loaded_store(base).await;

    let updated = store
      .update_task(&payload(
        "Buy milk",
        "",
        false,
        Some("2024-03-02T00:00:00.000Z")
      ))
      .await
      .expect("update");

    assert_eq!(updated.detail, "");
    assert_eq!(
      updated.limit,
      Utc
        .with_ymd_and_hms(2024, 3, 2, 0, 0, 0)
        .single()
    );
    assert_eq!(store.cached_tasks()[0], updated);
  }

  #[tokio::test]
  async fn echoed_fields_override_payload() {
    let (base, _rx) = serve(vec![
      (200, LIST_BODY),
      (
        200,
        r#"{"id":"t1","title":"Trimmed","done":true,"limit":null}"#
      )
    ]);
    let store = loaded_store(base).await;

    let updated = store
      .update_task(&payload(
        " Trimmed ", "2 litres", false, None
      ))
      .await
      .expect("update");

    assert_eq!(updated.title, "Trimmed");
    assert!(updated.done);
    assert_eq!(updated.limit, None);
    assert_eq!(updated.detail, "2 litres");
  }

  #[tokio::test]
  async fn error_status_becomes_remote_error() {
    let (base, _rx) = serve(vec![
      (200, LIST_BODY),
      (400, r#"{"message":"title is required"}"#)
    ]);
    let store = loaded_store(base).await;

    let err = store
      .update_task(&payload("", "", false, None))
      .await
      .expect_err("rejected update");

    assert_eq!(
      err,
      StoreError::Remote {
        status:  400,
        message: "title is required".to_string()
      }
    );
    assert_eq!(
      store.cached_tasks()[0].title,
      "Buy milk"
    );
  }

  #[tokio::test]
  async fn delete_removes_task_from_cache() {
    let (base, rx) = serve(vec![
      (200, LIST_BODY),
      (200, "")
    ]);
    let store = loaded_store(base).await;

    store
      .delete_task(&DeleteTaskArgs {
        id: "t1".to_string()
      })
      .await
      .expect("delete");

    let ids: Vec<String> = store
      .cached_tasks()
      .into_iter()
      .map(|task| task.id)
      .collect();
    assert_eq!(ids, vec!["t2".to_string()]);

    next_request(&rx);
    assert!(next_request(&rx).starts_with(
      "delete /api/lists/l1/tasks/t1 http/1.1"
    ));
  }

  #[tokio::test]
  async fn load_for_stale_list_is_discarded() {
    let (base, rx) =
      serve(vec![(200, LIST_BODY)]);
    let store =
      HttpTaskStore::new(&ApiSettings {
        base_url: base,
        token:    None,
        timeout:  Duration::from_secs(5)
      })
      .expect("build store");
    store
      .set_current_list_context("l2")
      .await
      .expect("select list");

    store
      .load_tasks_for_list("l1")
      .await
      .expect("load");

    assert!(store.cached_tasks().is_empty());
    let request = next_request(&rx);
    assert!(request.starts_with(
      "get /api/lists/l1/tasks http/1.1"
    ));
    assert!(!request.contains("authorization"));
  }

  #[tokio::test]
  async fn mutations_need_a_list() {
    let store =
      HttpTaskStore::new(&ApiSettings {
        base_url: "http://127.0.0.1:9"
          .to_string(),
        token:    None,
        timeout:  Duration::from_secs(1)
      })
      .expect("build store");
    assert_eq!(
      store
        .update_task(&payload("", "", false, None))
        .await,
      Err(StoreError::NoListContext)
    );
  }

  #[test]
  fn patch_for_another_task_is_ignored() {
    assert!(
      parse_task_patch("t1", r#"{"id":"t9","title":"x"}"#)
        .is_none()
    );
    assert!(parse_task_patch("t1", "ok").is_none());
    let patch = parse_task_patch(
      "t1",
      r#"{"title":"x","limit":"2024-03-01T10:00:00"}"#
    )
    .expect("patch");
    assert_eq!(patch.title.as_deref(), Some("x"));
    assert_eq!(
      patch.limit,
      Some(
        Utc
          .with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
          .single()
      )
    );
  }

  #[test]
  fn parses_bare_and_wrapped_lists() {
    let bare = parse_task_list(
      r#"[{"id":"a","title":"x","detail":"","done":false,"limit":null}]"#
    )
    .expect("bare list");
    assert_eq!(bare.len(), 1);

    let wrapped = parse_task_list(
      r#"{"listId":"l1","tasks":[{"id":"a","title":"x","done":true,"limit":"2024-03-01T01:00:00Z"}]}"#
    )
    .expect("wrapped list");
    assert!(wrapped[0].done);
    assert!(wrapped[0].limit.is_some());

    assert!(matches!(
      parse_task_list("<html>"),
      Err(StoreError::Decode(_))
    ));
  }

  #[test]
  fn error_message_prefers_json_fields() {
    assert_eq!(
      extract_error_message(
        StatusCode::BAD_REQUEST,
        r#"{"ErrorCode":400,"ErrorMessageJP":"不正","ErrorMessageEN":"Invalid title"}"#
      ),
      "Invalid title"
    );
    assert_eq!(
      extract_error_message(
        StatusCode::UNAUTHORIZED,
        r#"{"message":"token expired"}"#
      ),
      "token expired"
    );
  }

  #[test]
  fn error_message_falls_back_to_status() {
    assert_eq!(
      extract_error_message(
        StatusCode::NOT_FOUND,
        ""
      ),
      "HTTP 404: Not Found"
    );
    assert_eq!(
      extract_error_message(
        StatusCode::BAD_GATEWAY,
        "upstream down"
      ),
      "HTTP 502: upstream down"
    );
  }

  #[test]
  fn endpoint_escapes_segments() {
    let base = Url::parse(
      "http://example.test/api/"
    )
    .expect("base url");
    let url = endpoint_url(
      &base,
      &["lists", "a b", "tasks"]
    )
    .expect("endpoint");
    assert_eq!(
      url.as_str(),
      "http://example.test/api/lists/a%20b/tasks"
    );
  }
}
