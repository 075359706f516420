//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{RenderOptions, ViewMode};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "reqview";
const ENV_PREFIX: &str = "REQVIEW";
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 200;
const MAX_WATCH_DEBOUNCE_MS: u64 = 60_000;

/// Command-line arguments for the reqview binary.
#[derive(Debug, Parser)]
#[command(
    name = "reqview",
    version,
    about = "Render requirement documents to HTML"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REQVIEW_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a document once and write the assembled page.
    Render(RenderArgs),
    /// Render a document and keep the page file up to date as items change.
    Watch(WatchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,

    /// Directory holding the document's `.doorstop.yml` and item files.
    #[arg(value_name = "DOCUMENT_DIR", value_hint = ValueHint::DirPath)]
    pub dir: PathBuf,

    /// Write the page to this file instead of stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Which items the page shows (document|section|item).
    #[arg(long, value_name = "MODE", default_value = "document")]
    pub view: ViewMode,

    /// Item to select; it is rendered first and highlighted on the page.
    #[arg(long, value_name = "UID")]
    pub focus: Option<String>,

    /// Print every render result as a JSON line instead of the page.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub events: bool,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,

    /// Directory holding the document's `.doorstop.yml` and item files.
    #[arg(value_name = "DOCUMENT_DIR", value_hint = ValueHint::DirPath)]
    pub dir: PathBuf,

    /// Page file rewritten after every completed render.
    #[arg(short = 'o', long = "output", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Which items the page shows (document|section|item).
    #[arg(long, value_name = "MODE", default_value = "document")]
    pub view: ViewMode,

    /// Item to select; it is rendered first and highlighted on the page.
    #[arg(long, value_name = "UID")]
    pub focus: Option<String>,

    /// Override the debounce window for file-system events.
    #[arg(long = "watch-debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle HTML sanitization of rendered fragments.
    #[arg(
        long = "render-sanitize",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_sanitize: Option<bool>,

    /// Toggle rewriting of relative image and link targets to file URLs.
    #[arg(
        long = "render-resolve-resources",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_resolve_resources: Option<bool>,

    /// Override the minimum time between progress reports.
    #[arg(long = "render-progress-interval-ms", value_name = "MILLIS")]
    pub render_progress_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub watch: WatchSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub sanitize: bool,
    pub resolve_resources: bool,
    pub progress_interval: Duration,
}

impl RenderSettings {
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            sanitize: self.sanitize,
            resolve_resources: self.resolve_resources,
            progress_interval: self.progress_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub debounce: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Render(args) => raw.apply_overrides(&args.overrides),
        Command::Watch(args) => {
            raw.apply_overrides(&args.overrides);
            raw.apply_watch_overrides(args);
        }
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    watch: RawWatchSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(sanitize) = overrides.render_sanitize {
            self.render.sanitize = Some(sanitize);
        }
        if let Some(resolve) = overrides.render_resolve_resources {
            self.render.resolve_resources = Some(resolve);
        }
        if let Some(millis) = overrides.render_progress_interval_ms {
            self.render.progress_interval_ms = Some(millis);
        }
    }

    fn apply_watch_overrides(&mut self, args: &WatchArgs) {
        if let Some(millis) = args.debounce_ms {
            self.watch.debounce_ms = Some(millis);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            watch,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let watch = build_watch_settings(watch)?;

        Ok(Self {
            logging,
            render,
            watch,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let defaults = RenderOptions::default();
    let progress_interval = Duration::from_millis(
        render
            .progress_interval_ms
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS),
    );

    Ok(RenderSettings {
        sanitize: render.sanitize.unwrap_or(defaults.sanitize),
        resolve_resources: render
            .resolve_resources
            .unwrap_or(defaults.resolve_resources),
        progress_interval,
    })
}

fn build_watch_settings(watch: RawWatchSettings) -> Result<WatchSettings, LoadError> {
    let millis = watch.debounce_ms.unwrap_or(DEFAULT_WATCH_DEBOUNCE_MS);
    if millis == 0 {
        return Err(LoadError::invalid(
            "watch.debounce_ms",
            "must be greater than zero",
        ));
    }
    if millis > MAX_WATCH_DEBOUNCE_MS {
        return Err(LoadError::invalid(
            "watch.debounce_ms",
            format!("must not exceed {MAX_WATCH_DEBOUNCE_MS}"),
        ));
    }

    Ok(WatchSettings {
        debounce: Duration::from_millis(millis),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    sanitize: Option<bool>,
    resolve_resources: Option<bool>,
    progress_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatchSettings {
    debounce_ms: Option<u64>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_render_options() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert_eq!(settings.render.options(), RenderOptions::default());
        assert_eq!(settings.watch.debounce, Duration::from_millis(200));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.render.sanitize = Some(false);
        raw.render.progress_interval_ms = Some(500);

        let overrides = SettingsOverrides {
            log_level: Some("debug".to_string()),
            render_sanitize: Some(true),
            render_progress_interval_ms: Some(0),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(settings.render.sanitize);
        assert_eq!(settings.render.progress_interval, Duration::ZERO);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = SettingsOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());
        let err = Settings::from_raw(raw).expect_err("invalid level");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "logging.level",
                ..
            }
        ));
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let mut raw = RawSettings::default();
        raw.watch.debounce_ms = Some(0);
        let err = Settings::from_raw(raw).expect_err("invalid debounce");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "watch.debounce_ms",
                ..
            }
        ));
    }

    #[test]
    fn parse_render_arguments() {
        let args = CliArgs::parse_from([
            "reqview",
            "render",
            "docs/reqs",
            "-o",
            "out.html",
            "--view",
            "section",
            "--focus",
            "REQ003",
            "--render-sanitize",
            "yes",
        ]);

        let Command::Render(render) = args.command else {
            panic!("expected render command");
        };
        assert_eq!(render.dir, PathBuf::from("docs/reqs"));
        assert_eq!(render.output, Some(PathBuf::from("out.html")));
        assert_eq!(render.view, ViewMode::Section);
        assert_eq!(render.focus.as_deref(), Some("REQ003"));
        assert_eq!(render.overrides.render_sanitize, Some(true));
        assert!(!render.events);
    }

    #[test]
    fn parse_render_defaults() {
        let args = CliArgs::parse_from(["reqview", "render", "docs", "--events"]);
        let Command::Render(render) = args.command else {
            panic!("expected render command");
        };
        assert_eq!(render.view, ViewMode::Document);
        assert!(render.output.is_none());
        assert!(render.events);
    }

    #[test]
    fn parse_watch_arguments() {
        let args = CliArgs::parse_from([
            "reqview",
            "watch",
            "docs",
            "--output",
            "page.html",
            "--watch-debounce-ms",
            "50",
            "--log-json",
            "true",
        ]);

        let Command::Watch(watch) = args.command else {
            panic!("expected watch command");
        };
        assert_eq!(watch.output, PathBuf::from("page.html"));
        assert_eq!(watch.overrides.log_json, Some(true));

        let mut raw = RawSettings::default();
        raw.apply_overrides(&watch.overrides);
        raw.apply_watch_overrides(&watch);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.watch.debounce, Duration::from_millis(50));
    }

    #[test]
    fn watch_requires_output() {
        assert!(CliArgs::try_parse_from(["reqview", "watch", "docs"]).is_err());
    }

    #[test]
    fn unknown_view_mode_is_rejected() {
        assert!(CliArgs::try_parse_from(["reqview", "render", "docs", "--view", "tree"]).is_err());
    }
}
