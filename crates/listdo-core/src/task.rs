use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

const OFFSETLESS_LIMIT_FORMATS: [&str; 3] =
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Task as the backend returns it. Nulls and odd due dates decode to
/// defaults so one bad record cannot fail a whole list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub title: String,

    #[serde(default, deserialize_with = "empty_if_null")]
    pub detail: String,

    #[serde(default, deserialize_with = "false_if_null")]
    pub done: bool,

    #[serde(default, deserialize_with = "lenient_limit")]
    pub limit: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            detail: String::new(),
            done: false,
            limit: None,
        }
    }

    /// Applies an accepted update to a cached copy. A payload without
    /// `limit` leaves the cached due date alone.
    pub fn apply_update(&mut self, payload: &UpdateTaskPayload) {
        self.title = payload.title.clone();
        self.detail = payload.detail.clone();
        self.done = payload.done;
        if let Some(parsed) = payload.limit.as_deref().and_then(parse_limit) {
            self.limit = Some(parsed);
        }
    }
}

/// Reads a backend due date. RFC 3339 is expected; offset-less date-times
/// and bare dates are read as UTC. Anything else is dropped with a warning.
pub fn parse_limit(raw: &str) -> Option<DateTime<Utc>> {
    let token = raw.trim();
    if token.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(token) {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = OFFSETLESS_LIMIT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(token, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(token, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });
    match naive {
        Some(naive) => {
            warn!(limit = token, "due date has no offset; reading it as UTC");
            Some(naive.and_utc())
        }
        None => {
            warn!(limit = token, "ignoring unparseable due date");
            None
        }
    }
}

fn empty_if_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn false_if_null<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_limit<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .as_deref()
        .and_then(parse_limit))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateTaskPayload {
    pub id: String,
    pub title: String,
    pub detail: String,
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Request body sent to the backend; the id travels in the path.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateTaskBody<'a> {
    pub title: &'a str,
    pub detail: &'a str,
    pub done: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<&'a str>,
}

impl<'a> From<&'a UpdateTaskPayload> for UpdateTaskBody<'a> {
    fn from(payload: &'a UpdateTaskPayload) -> Self {
        Self {
            title: &payload.title,
            detail: &payload.detail,
            done: payload.done,
            limit: payload.limit.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteTaskArgs {
    pub id: String,
}
