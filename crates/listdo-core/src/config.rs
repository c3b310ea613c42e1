use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

pub const DEFAULT_BASE_URL: &str =
  "http://127.0.0.1:3000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const RC_ENV_VAR: &str = "LISTDORC";

/// What to do with a due date that does
/// not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DueDatePolicy {
  /// Send the update without `limit`.
  #[default]
  Omit,
  /// Refuse to submit and show an error.
  Reject
}

impl FromStr for DueDatePolicy {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str()
    {
      | "omit" => Ok(Self::Omit),
      | "reject" => Ok(Self::Reject),
      | other => {
        Err(anyhow!(
          "invalid due.invalid value \
           '{other}' (expected omit or \
           reject)"
        ))
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
  pub base_url: String,
  pub token:    Option<String>,
  pub timeout:  Duration
}

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Defaults only, no rc file.
  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "api.base_url".to_string(),
      DEFAULT_BASE_URL.to_string()
    );
    map.insert(
      "api.timeout_secs".to_string(),
      DEFAULT_TIMEOUT_SECS.to_string()
    );
    map.insert(
      "due.invalid".to_string(),
      "omit".to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    Config {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(listdorc = %path.display(), "loading listdorc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no listdorc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .map(|v| v.trim())
      .filter(|v| !v.is_empty())
      .map(str::to_string)
  }

  pub fn api_settings(
    &self
  ) -> anyhow::Result<ApiSettings> {
    let base_url = self
      .get("api.base_url")
      .unwrap_or_else(|| {
        DEFAULT_BASE_URL.to_string()
      });
    let timeout_secs = match self
      .get("api.timeout_secs")
    {
      | Some(raw) => {
        raw.parse::<u64>().with_context(
          || {
            format!(
              "invalid api.timeout_secs: \
               {raw}"
            )
          }
        )?
      }
      | None => DEFAULT_TIMEOUT_SECS
    };

    Ok(ApiSettings {
      base_url,
      token: self.get("api.token"),
      timeout: Duration::from_secs(
        timeout_secs
      )
    })
  }

  pub fn due_policy(
    &self
  ) -> anyhow::Result<DueDatePolicy> {
    self
      .get("due.invalid")
      .map_or(
        Ok(DueDatePolicy::default()),
        |raw| raw.parse()
      )
  }

  pub fn timezone(&self) -> Option<String> {
    self.get("timezone")
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    if self.loaded_files.contains(&path) {
      warn!(file = %path.display(), "listdorc already loaded; skipping include cycle");
      return Ok(());
    }
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      if key == "api.token" {
        trace!(key = %key, "loaded config key");
      } else {
        trace!(key = %key, value = %value, "loaded config key");
      }
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir() else {
    warn!(
      "cannot determine home \
       directory"
    );
    return Ok(None);
  };
  let candidate = home.join(".listdorc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
