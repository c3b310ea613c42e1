use chrono::{
  DateTime,
  LocalResult,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

const TIMEZONE_ENV_VAR: &str =
  "LISTDO_TIMEZONE";
const SYSTEM_TZ_ENV_VAR: &str = "TZ";

/// Format produced by a browser
/// `datetime-local` input.
pub const LOCAL_INPUT_FORMAT: &str =
  "%Y-%m-%dT%H:%M";

const LOCAL_PARSE_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M"
];

/// Converts between the wall-clock
/// strings a date/time input shows and
/// the UTC instants the backend stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCodec {
  tz: Tz
}

impl TimeCodec {
  #[must_use]
  pub fn new(tz: Tz) -> Self {
    Self { tz }
  }

  #[must_use]
  pub fn utc() -> Self {
    Self::new(chrono_tz::UTC)
  }

  #[must_use]
  pub fn timezone(&self) -> Tz {
    self.tz
  }

  /// Empty for `None`; otherwise the
  /// instant in viewer time, truncated to
  /// the minute.
  #[must_use]
  pub fn to_local_input_string(
    &self,
    instant: Option<DateTime<Utc>>
  ) -> String {
    match instant {
      | Some(instant) => {
        instant
          .with_timezone(&self.tz)
          .format(LOCAL_INPUT_FORMAT)
          .to_string()
      }
      | None => String::new()
    }
  }

  /// `None` for empty input and for
  /// anything that does not name a real
  /// local instant.
  #[must_use]
  pub fn to_utc_string(
    &self,
    local: &str
  ) -> Option<String> {
    self
      .parse_local(local)
      .map(format_utc_iso)
  }

  #[tracing::instrument(skip(self), fields(tz = %self.tz))]
  pub fn parse_local(
    &self,
    local: &str
  ) -> Option<DateTime<Utc>> {
    let token = local.trim();
    if token.is_empty() {
      return None;
    }

    if let Ok(dt) =
      DateTime::parse_from_rfc3339(token)
    {
      return Some(dt.with_timezone(&Utc));
    }

    let naive = LOCAL_PARSE_FORMATS
      .iter()
      .find_map(|fmt| {
        NaiveDateTime::parse_from_str(
          token, fmt
        )
        .ok()
      });
    let Some(naive) = naive else {
      tracing::debug!(
        "unparseable local datetime"
      );
      return None;
    };

    match self
      .tz
      .from_local_datetime(&naive)
    {
      | LocalResult::Single(local_dt) => {
        Some(local_dt.with_timezone(&Utc))
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        tracing::warn!(
          first = %first,
          second = %second,
          "ambiguous local datetime; using earliest"
        );
        let chosen = if first <= second {
          first
        } else {
          second
        };
        Some(chosen.with_timezone(&Utc))
      }
      | LocalResult::None => {
        tracing::warn!(
          "local datetime does not exist \
           in viewer timezone"
        );
        None
      }
    }
  }
}

impl Default for TimeCodec {
  fn default() -> Self {
    Self::utc()
  }
}

/// `YYYY-MM-DDTHH:MM:SS.sssZ`, the shape
/// browsers emit from `toISOString`.
#[must_use]
pub fn format_utc_iso(
  instant: DateTime<Utc>
) -> String {
  instant
    .format("%Y-%m-%dT%H:%M:%S%.3fZ")
    .to_string()
}

/// Picks the viewer timezone: the
/// `LISTDO_TIMEZONE` env var, then the
/// configured value, then `TZ`, then UTC.
pub fn resolve_viewer_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(SYSTEM_TZ_ENV_VAR)
    && let Some(tz) = parse_timezone(
      raw.trim_start_matches(':'),
      SYSTEM_TZ_ENV_VAR
    )
  {
    return tz;
  }

  tracing::warn!(
    "no viewer timezone configured; \
     using UTC"
  );
  chrono_tz::UTC
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured viewer timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}
