use std::{
    fs,
    io,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::controller::Timing;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field} = {value} is out of range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "d1000")]
    pub poll_interval_ms: u64,
    #[serde(default = "d500")]
    pub seek_suppress_ms: u64,
    #[serde(default = "d500")]
    pub duration_recheck_ms: u64,
    #[serde(default = "d1000")]
    pub call_timeout_ms: u64,
}
fn d1000() -> u64 {
    1000
}
fn d500() -> u64 {
    500
}
impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: d1000(),
            seek_suppress_ms: d500(),
            duration_recheck_ms: d500(),
            call_timeout_ms: d1000(),
        }
    }
}

const POLL_INTERVAL_MS: RangeInclusive<u64> = 100..=10_000;
const SEEK_SUPPRESS_MS: RangeInclusive<u64> = 0..=5_000;
const DURATION_RECHECK_MS: RangeInclusive<u64> = 50..=10_000;
const CALL_TIMEOUT_MS: RangeInclusive<u64> = 50..=10_000;

impl TimingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check("timing.poll_interval_ms", self.poll_interval_ms, &POLL_INTERVAL_MS)?;
        check("timing.seek_suppress_ms", self.seek_suppress_ms, &SEEK_SUPPRESS_MS)?;
        check(
            "timing.duration_recheck_ms",
            self.duration_recheck_ms,
            &DURATION_RECHECK_MS,
        )?;
        check("timing.call_timeout_ms", self.call_timeout_ms, &CALL_TIMEOUT_MS)
    }

    #[must_use]
    pub const fn timing(&self) -> Timing {
        Timing {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            seek_suppress: Duration::from_millis(self.seek_suppress_ms),
            duration_recheck: Duration::from_millis(self.duration_recheck_ms),
        }
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn check(field: &'static str, value: u64, range: &RangeInclusive<u64>) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub snapshot_path: Option<String>,
    #[serde(default)]
    pub events_path: Option<String>,
    #[serde(default)]
    pub pretty_snapshot: bool,
}

impl Output {
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(expand(
            self.snapshot_path
                .as_deref()
                .unwrap_or("$XDG_RUNTIME_DIR/garak/state.json"),
        ))
    }

    #[must_use]
    pub fn events_path(&self) -> PathBuf {
        PathBuf::from(expand(
            self.events_path
                .as_deref()
                .unwrap_or("$XDG_RUNTIME_DIR/garak/events.jsonl"),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct Logging {
    #[serde(default = "default_level")]
    pub level: String,
}
fn default_level() -> String {
    "warn".into()
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.timing.validate()?;
        Ok(cfg)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text, path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// `$XDG_CONFIG_HOME/garak/config.toml`
#[must_use]
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(expand("$HOME/.config")))
        .join("garak")
        .join("config.toml")
}

#[must_use]
pub fn runtime_dir() -> String {
    std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| {
        let uid = nix::unistd::Uid::current().as_raw();
        format!("/run/user/{uid}")
    })
}

/// Expands `$HOME`, `$XDG_CONFIG_HOME`, `$XDG_CACHE_HOME` and `$XDG_RUNTIME_DIR`.
#[must_use]
pub fn expand(path: &str) -> String {
    let mut s = path.to_string();
    if let Some(home) = dirs::home_dir() {
        s = s.replace("$HOME", home.to_string_lossy().as_ref());
    }
    if let Some(cfg) = dirs::config_dir() {
        s = s.replace("$XDG_CONFIG_HOME", cfg.to_string_lossy().as_ref());
    }
    if let Some(cache) = dirs::cache_dir() {
        s = s.replace("$XDG_CACHE_HOME", cache.to_string_lossy().as_ref());
    }
    s.replace("$XDG_RUNTIME_DIR", &runtime_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::from_toml(text, Path::new("config.toml"))
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.timing.timing(), Timing::default());
        assert_eq!(cfg.timing.call_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.logging.level, "warn");
        assert!(!cfg.output.pretty_snapshot);
    }

    #[test]
    fn timing_overrides() {
        let cfg = parse(
            r#"
            [timing]
            poll_interval_ms = 250
            seek_suppress_ms = 0

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        let timing = cfg.timing.timing();
        assert_eq!(timing.poll_interval, Duration::from_millis(250));
        assert_eq!(timing.seek_suppress, Duration::ZERO);
        assert_eq!(timing.duration_recheck, Duration::from_millis(500));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn out_of_range_is_rejected() {
        let err = parse("[timing]\npoll_interval_ms = 10\n").unwrap_err();
        match err {
            ConfigError::OutOfRange { field, value, .. } => {
                assert_eq!(field, "timing.poll_interval_ms");
                assert_eq!(value, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse("[timing]\nseek_suppress_ms = 60000\n").is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            parse("[timing\npoll_interval_ms = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.timing.poll_interval_ms, 1000);
    }

    #[test]
    fn runtime_dir_expansion() {
        let expanded = expand("$XDG_RUNTIME_DIR/garak/state.json");
        assert!(!expanded.contains('$'));
        assert!(expanded.ends_with("/garak/state.json"));
    }
}
