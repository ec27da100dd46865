use chrono::{DateTime, Local};
use colored::{ColoredString, Colorize};
use glob::glob;
use log::{Level, LevelFilter, Record};
use std::fmt::Arguments;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while installing the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory or file could not be created.
    #[error("log file error: {0}")]
    Io(#[from] std::io::Error),

    /// The rotation pattern built from the directory is not a valid glob.
    #[error("invalid log rotation pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A global logger was already installed.
    #[error("logger already installed: {0}")]
    SetLogger(#[from] log::SetLoggerError),
}

/// # Logger Local Options
///
/// Where and how much the process logs.
#[derive(Debug, Clone)]
pub struct LoggerLocalOptions {
    /// Prefix of the log file names.
    pub app_name: String,
    /// Directory holding the log files. Created when missing.
    pub log_dir: PathBuf,
    /// How many log files survive rotation, the new one included.
    pub keep: usize,
    /// Maximum level written to either output.
    pub level: LevelFilter,
    /// Also log to stdout with colored levels.
    pub use_tty: bool,
}

impl LoggerLocalOptions {
    /// Options with the usual defaults: `./logs`, ten files, info, console on.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            log_dir: PathBuf::from("./logs"),
            keep: 10,
            level: LevelFilter::Info,
            use_tty: true,
        }
    }
}

/// Maps a configured level name onto a filter.
///
/// Accepts `critical|error|warning|warn|info|debug|trace` in any case.
/// `critical` has no `log` counterpart and becomes error. Unknown names fall
/// back to info.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_lowercase().as_str() {
        "critical" | "error" => LevelFilter::Error,
        "warning" | "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// `<app>-<YYYYmmdd_HHMMSS>.log`
pub fn log_file_name(app_name: &str, at: DateTime<Local>) -> String {
    format!("{}-{}.log", app_name, at.format("%Y%m%d_%H%M%S"))
}

/// Deletes the oldest `<app>-*.log` files in `log_dir` so that `keep - 1`
/// remain, leaving room for the file about to be created. Returns the paths
/// that were removed.
///
/// The timestamp in the file name sorts lexically, so the newest files are
/// the greatest names.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<Vec<PathBuf>, LoggerError> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = glob(&pattern)?.filter_map(Result::ok).collect();

    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = Vec::new();
    for old_file in log_files.into_iter().skip(keep.saturating_sub(1)) {
        match std::fs::remove_file(&old_file) {
            Ok(()) => removed.push(old_file),
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(removed)
}

fn thread_name() -> String {
    std::thread::current().name().unwrap_or("unnamed").to_string()
}

fn paint(level: Level) -> ColoredString {
    let name = level.to_string();
    match level {
        Level::Error => name.bright_red().bold(),
        Level::Warn => name.bright_yellow(),
        Level::Info => name.bright_green(),
        Level::Debug => name.bright_white(),
        Level::Trace => name.bright_cyan(),
    }
}

fn write_line(out: fern::FormatCallback<'_>, message: &Arguments<'_>, record: &Record<'_>, level: &dyn std::fmt::Display) {
    out.finish(format_args!(
        "{} {} {} [{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.target(),
        level,
        thread_name(),
        message
    ))
}

/// Builds the fern dispatch without installing it: rotates old files,
/// creates the new log file and chains the console when requested. Returns
/// the dispatch and the path of the new file.
pub fn dispatch(options: &LoggerLocalOptions) -> Result<(fern::Dispatch, PathBuf), LoggerError> {
    std::fs::create_dir_all(&options.log_dir)?;
    rotate_logs(&options.app_name, &options.log_dir, options.keep)?;
    let log_path = options.log_dir.join(log_file_name(&options.app_name, Local::now()));

    let file = fern::Dispatch::new()
        .format(|out, message, record| write_line(out, message, record, &record.level()))
        .chain(fern::log_file(&log_path)?);

    let mut root = fern::Dispatch::new()
        .level(options.level)
        .level_for("tungstenite", LevelFilter::Warn)
        .level_for("tokio_tungstenite", LevelFilter::Warn)
        .level_for("hyper_util", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(file);

    if options.use_tty {
        let console = fern::Dispatch::new()
            .format(|out, message, record| write_line(out, message, record, &paint(record.level())))
            .chain(std::io::stdout());
        root = root.chain(console);
    }

    Ok((root, log_path))
}

/// Installs the global logger. Returns the path of the new log file.
pub fn init(options: &LoggerLocalOptions) -> Result<PathBuf, LoggerError> {
    let (root, log_path) = dispatch(options)?;
    root.apply()?;
    Ok(log_path)
}
