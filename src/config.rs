use std::{env, str::FromStr};

/// Environment variable read by [`Config::from_env`].
pub const CHECK_ENV: &str = "RBALLOC_CHECK";

/// How much of the heap the allocator verifies after every allocate and
/// release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
  /// No verification.
  Off,
  /// Linear walk over every boundary tag.
  Heap,
  /// The linear walk plus a full walk of the free tree.
  Full,
}

/// `Heap` in debug builds, `Off` in release builds.
impl Default for CheckLevel {
  fn default() -> Self {
    if cfg!(debug_assertions) {
      CheckLevel::Heap
    } else {
      CheckLevel::Off
    }
  }
}

impl FromStr for CheckLevel {
  type Err = String;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().as_str() {
      "off" | "0" | "none" => Ok(CheckLevel::Off),
      "heap" | "1" => Ok(CheckLevel::Heap),
      "full" | "2" | "tree" => Ok(CheckLevel::Full),
      other => Err(format!("unknown check level `{other}`")),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
  pub check: CheckLevel,
}

impl Config {
  pub fn with_check(
    mut self,
    check: CheckLevel,
  ) -> Self {
    self.check = check;
    self
  }

  /// Defaults, overridden by `RBALLOC_CHECK=off|heap|full` when set.
  /// An unparsable value is logged and ignored.
  pub fn from_env() -> Self {
    let config = Self::default();

    match env::var(CHECK_ENV) {
      Ok(value) => match value.parse() {
        Ok(check) => config.with_check(check),
        Err(err) => {
          log::warn!("{CHECK_ENV}: {err}, keeping {:?}", config.check);
          config
        }
      },
      Err(_) => config,
    }
  }
}
