//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quaderno";
const DEFAULT_ENTRIES_DIR: &str = "journal_entries";
const DEFAULT_OUTPUT_DIR: &str = "output_files";
const DEFAULT_RENDERER_COMMAND: &str = "compile-latex";
const DEFAULT_TEMPLATE_PATH: &str = "assets/latex_template.tex";
const DEFAULT_ARTIFACT_EXTENSION: &str = "pdf";

/// Command-line arguments for the Quaderno binary.
#[derive(Debug, Parser)]
#[command(name = "quaderno", version, about = "Quaderno journal back end")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "QUADERNO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the front-end protocol over stdio.
    Serve(ServeArgs),
    /// Compile one date's entry and paginate the artifact to stdout.
    Compile(CompileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Date of the entry to compile (YYYY-MM-DD).
    #[arg(value_name = "DATE")]
    pub date: String,

    /// Compile this file instead of the stored entry for the date.
    #[arg(long = "file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the directory journal entries are stored in.
    #[arg(long = "storage-entries-dir", value_name = "PATH")]
    pub entries_dir: Option<PathBuf>,

    /// Override the directory compiled artifacts are written to.
    #[arg(long = "storage-output-dir", value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Override the external renderer executable.
    #[arg(long = "renderer-command", value_name = "PATH")]
    pub renderer_command: Option<PathBuf>,

    /// Override the document template handed to the renderer.
    #[arg(long = "renderer-template-path", value_name = "PATH")]
    pub template_path: Option<PathBuf>,

    /// Override the artifact file extension.
    #[arg(long = "renderer-artifact-extension", value_name = "EXT")]
    pub artifact_extension: Option<String>,

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
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    pub renderer: RendererSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub entries_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub command: PathBuf,
    pub template_path: PathBuf,
    pub artifact_extension: String,
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

/// Parse the command line and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("QUADERNO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Compile(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&Overrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    storage: RawStorageSettings,
    renderer: RawRendererSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    entries_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    command: Option<PathBuf>,
    template_path: Option<PathBuf>,
    artifact_extension: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dir) = overrides.entries_dir.as_ref() {
            self.storage.entries_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.storage.output_dir = Some(dir.clone());
        }
        if let Some(command) = overrides.renderer_command.as_ref() {
            self.renderer.command = Some(command.clone());
        }
        if let Some(path) = overrides.template_path.as_ref() {
            self.renderer.template_path = Some(path.clone());
        }
        if let Some(extension) = overrides.artifact_extension.as_ref() {
            self.renderer.artifact_extension = Some(extension.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            storage,
            renderer,
            logging,
        } = raw;

        let storage = build_storage_settings(storage)?;
        let renderer = build_renderer_settings(renderer)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            storage,
            renderer,
            logging,
        })
    }
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let entries_dir = non_empty_path(
        storage
            .entries_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENTRIES_DIR)),
        "storage.entries_dir",
    )?;
    let output_dir = non_empty_path(
        storage
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        "storage.output_dir",
    )?;

    Ok(StorageSettings {
        entries_dir,
        output_dir,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let command = non_empty_path(
        renderer
            .command
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDERER_COMMAND)),
        "renderer.command",
    )?;
    let template_path = non_empty_path(
        renderer
            .template_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH)),
        "renderer.template_path",
    )?;

    let artifact_extension = renderer
        .artifact_extension
        .unwrap_or_else(|| DEFAULT_ARTIFACT_EXTENSION.to_string());
    if artifact_extension.is_empty() || artifact_extension.starts_with('.') {
        return Err(LoadError::invalid(
            "renderer.artifact_extension",
            "must be a bare extension without a leading dot",
        ));
    }

    Ok(RendererSettings {
        command,
        template_path,
        artifact_extension,
    })
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

fn non_empty_path(value: PathBuf, key: &'static str) -> Result<PathBuf, LoadError> {
    if value.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(value)
}
