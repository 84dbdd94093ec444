use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::notify::DEFAULT_ICON;
use crate::repository::DATABASE_NAME;

const DEFAULTS: [(&str, &str); 5] = [
  ("data.location", "~/.todo"),
  ("color", "on"),
  ("notifications", "granted"),
  (
    "notifications.icon",
    DEFAULT_ICON
  ),
  ("database.name", DATABASE_NAME)
];

/// Settings from `~/.todorc` (or
/// `$TODORC`), layered over the
/// built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
  settings: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

/// One meaningful line of an rc file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl Default for Config {
  fn default() -> Self {
    let settings = DEFAULTS
      .iter()
      .map(|(key, value)| {
        (
          key.to_string(),
          value.to_string()
        )
      })
      .collect();

    Self {
      settings,
      loaded_files: Vec::new()
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    todorc_override
  ))]
  pub fn load(
    todorc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_todorc_path(
      todorc_override
    ) {
      Some(path) => {
        info!(todorc = %path.display(), "reading todorc");
        cfg.read_rc_file(&path)?;
      }
      None => {
        debug!(
          "no todorc; built-in \
           settings only"
        );
      }
    }

    Ok(cfg)
  }

  /// Apply `KEY=VALUE` pairs from the
  /// command line. A leading `rc.` is
  /// dropped from the key.
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
    for (raw_key, value) in overrides {
      let key = raw_key
        .strip_prefix("rc.")
        .unwrap_or(&raw_key)
        .to_string();
      debug!(key = %key, value = %value, "setting overridden");
      self.settings.insert(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.settings.get(key).cloned()
  }

  /// Boolean setting; `None` when the
  /// key is unset, an error when the
  /// value is not a recognised switch.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) =
      self.settings.get(key)
    else {
      return Ok(None);
    };
    parse_bool(raw)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "invalid {key} setting: \
           {raw}"
        )
      })
  }

  pub fn database_name(
    &self
  ) -> String {
    match self.get("database.name") {
      Some(name)
        if !name.trim().is_empty() =>
      {
        name.trim().to_string()
      }
      _ => DATABASE_NAME.to_string()
    }
  }

  pub fn notification_icon(
    &self
  ) -> String {
    self
      .get("notifications.icon")
      .unwrap_or_else(|| {
        DEFAULT_ICON.to_string()
      })
  }

  #[tracing::instrument(skip(self))]
  fn read_rc_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      bail!(
        "include cycle: {} is already \
         loaded",
        path.display()
      );
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "cannot read todorc {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line_no = idx + 1;
      let parsed = parse_rc_line(
        raw_line
      )
      .with_context(|| {
        format!(
          "{}:{line_no}",
          path.display()
        )
      })?;

      match parsed {
        None => {}
        Some(RcLine::Include(target)) => {
          let include =
            resolve_include_path(
              &base_dir, target
            )?;
          if !include.exists() {
            warn!(include = %include.display(), "included todorc missing; skipped");
            continue;
          }
          debug!(include = %include.display(), line = line_no, "following include");
          self.read_rc_file(&include)?;
        }
        Some(RcLine::Setting(
          key,
          value
        )) => {
          trace!(key, value, "todorc setting");
          self.settings.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

/// Strip comments and classify a line.
/// Blank and comment-only lines give
/// `None`.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>>
{
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Ok(Some(RcLine::Include(
      target.trim()
    )));
  }

  let (key, value) = line
    .split_once('=')
    .ok_or_else(|| {
      anyhow!(
        "expected `key = value`, got \
         {raw:?}"
      )
    })?;
  let key = key.trim();
  if key.is_empty() {
    bail!("setting has no key: {raw:?}");
  }
  Ok(Some(RcLine::Setting(
    key,
    value.trim()
  )))
}

/// Data directory from `--data`, then
/// `data.location`, then `~/.todo`.
/// Created when missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    (Some(path), _) => {
      path.to_path_buf()
    }
    (None, Some(location)) => {
      expand_tilde(Path::new(&location))
    }
    (None, None) => default_data_dir()?
  };

  if !dir.is_dir() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "cannot create data \
           directory {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn resolve_todorc_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(path.to_path_buf());
  }

  if let Ok(env_path) =
    std::env::var("TODORC")
  {
    return (env_path != "/dev/null")
      .then(|| PathBuf::from(env_path));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "no home directory; ~/.todorc \
       not read"
    );
    return None;
  };
  let candidate = home.join(".todorc");
  candidate
    .is_file()
    .then_some(candidate)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  dirs::home_dir()
    .map(|home| home.join(".todo"))
    .ok_or_else(|| {
      anyhow!(
        "no home directory for the \
         default data location"
      )
    })
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.is_empty() {
    bail!("include needs a path");
  }

  let expanded =
    expand_tilde(Path::new(include));
  Ok(if expanded.is_absolute() {
    expanded
  } else {
    base_dir.join(expanded)
  })
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

fn parse_bool(raw: &str) -> Option<bool> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    "0" | "n" | "no" | "off"
    | "false" => Some(false),
    _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    parse_rc_line,
    resolve_data_dir
  };

  #[test]
  fn loads_file_with_include() {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "notifications = denied\n"
    )
    .expect("write include");
    let rc = temp.path().join("todorc");
    fs::write(
      &rc,
      "# comment\ncolor = off  # \
       trailing\ninclude extra.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("valid switch"),
      Some(false)
    );
    assert_eq!(
      cfg
        .get("notifications")
        .as_deref(),
      Some("denied")
    );
    assert_eq!(
      cfg.database_name(),
      "ToDoDB"
    );
    assert_eq!(
      cfg.loaded_files.len(),
      2
    );
  }

  #[test]
  fn rejects_malformed_line_and_cycles()
  {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(&rc, "color on\n")
      .expect("write rc");
    assert!(
      Config::load(Some(&rc)).is_err()
    );

    let looped =
      temp.path().join("loop.rc");
    fs::write(
      &looped,
      "include loop.rc\n"
    )
    .expect("write loop");
    assert!(
      Config::load(Some(&looped))
        .is_err()
    );
  }

  #[test]
  fn classifies_rc_lines() {
    assert_eq!(
      parse_rc_line("   # note")
        .expect("comment"),
      None
    );
    assert_eq!(
      parse_rc_line(
        "include ~/more.rc"
      )
      .expect("include"),
      Some(RcLine::Include(
        "~/more.rc"
      ))
    );
    assert_eq!(
      parse_rc_line(
        " color = on # why not"
      )
      .expect("setting"),
      Some(RcLine::Setting(
        "color", "on"
      ))
    );
    assert!(
      parse_rc_line(" = on").is_err()
    );
  }

  #[test]
  fn bool_settings_are_strict() {
    let mut cfg = Config::default();
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("default"),
      Some(true)
    );
    assert_eq!(
      cfg
        .get_bool("missing")
        .expect("unset"),
      None
    );

    cfg.apply_overrides(vec![(
      "rc.color".to_string(),
      "sometimes".to_string()
    )]);
    assert!(
      cfg.get_bool("color").is_err()
    );
  }

  #[test]
  fn overrides_and_data_dir() {
    let temp =
      tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "rc.database.name".to_string(),
      "Chores".to_string()
    )]);
    assert_eq!(
      cfg.database_name(),
      "Chores"
    );

    let data = temp.path().join("nested");
    let dir = resolve_data_dir(
      &cfg,
      Some(&data)
    )
    .expect("resolve");
    assert_eq!(dir, data);
    assert!(data.is_dir());
  }
}
