use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
  Layer, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
  /// The logging level. default: info
  #[serde(default)]
  pub level: LogLevel,
  /// Controls logging to stderr
  #[serde(default)]
  pub stdio: StdioLogMode,
  /// Use tracing-subscriber's pretty logging output option.
  #[serde(default)]
  pub pretty: bool,
  /// Including information about the log location (ie the function which produced the log).
  /// Tracing refers to this as the 'target'.
  #[serde(default = "default_location")]
  pub location: bool,
  /// Enable ANSI colors in the standard output.
  #[serde(default = "default_ansi")]
  pub ansi: bool,
}

fn default_location() -> bool {
  true
}

fn default_ansi() -> bool {
  true
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: Default::default(),
      stdio: Default::default(),
      pretty: false,
      location: default_location(),
      ansi: default_ansi(),
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<tracing::Level> for LogLevel {
  fn from(value: tracing::Level) -> Self {
    match value {
      tracing::Level::TRACE => LogLevel::Trace,
      tracing::Level::DEBUG => LogLevel::Debug,
      tracing::Level::INFO => LogLevel::Info,
      tracing::Level::WARN => LogLevel::Warn,
      tracing::Level::ERROR => LogLevel::Error,
    }
  }
}

impl From<LogLevel> for LevelFilter {
  fn from(value: LogLevel) -> Self {
    match value {
      LogLevel::Trace => LevelFilter::TRACE,
      LogLevel::Debug => LevelFilter::DEBUG,
      LogLevel::Info => LevelFilter::INFO,
      LogLevel::Warn => LevelFilter::WARN,
      LogLevel::Error => LevelFilter::ERROR,
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

/// Installs the global tracing subscriber.
/// Should only be called once in the binary startup sequence.
/// Logs go to stderr, stdout is left to command output.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let level = LevelFilter::from(config.level);

  let registry = tracing_subscriber::registry();

  let stdio = match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => Some(
      tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .pretty()
        .with_ansi(config.ansi)
        .with_target(config.location)
        .with_file(config.location)
        .with_line_number(config.location)
        .with_filter(level)
        .boxed(),
    ),
    (StdioLogMode::Standard, false) => Some(
      tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(config.location)
        .with_filter(level)
        .boxed(),
    ),
    (StdioLogMode::Json, _) => Some(
      tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .json()
        .with_target(config.location)
        .with_file(config.location)
        .with_line_number(config.location)
        .with_filter(level)
        .boxed(),
    ),
    (StdioLogMode::None, _) => None,
  };

  registry
    .with(stdio)
    .try_init()
    .context("Failed to init logger")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn log_config_defaults_when_fields_omitted() {
    let config: LogConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.level, LogLevel::Info);
    assert_eq!(config.stdio, StdioLogMode::Standard);
    assert!(config.location);
    assert!(!config.pretty);
  }

  #[test]
  fn level_names_are_lowercase() {
    let config: LogConfig =
      serde_json::from_str(r#"{"level":"debug","stdio":"json"}"#)
        .unwrap();
    assert_eq!(config.level, LogLevel::Debug);
    assert_eq!(config.stdio, StdioLogMode::Json);
  }

  #[test]
  fn tracing_level_converts() {
    assert_eq!(LogLevel::from(tracing::Level::WARN), LogLevel::Warn);
    assert_eq!(
      LevelFilter::from(LogLevel::Trace),
      LevelFilter::TRACE
    );
  }
}
