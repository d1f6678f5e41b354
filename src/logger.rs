use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::ClientConfig;

static COMPLETION_LOGGER: Lazy<CompletionLogger> = Lazy::new(CompletionLogger::new);
static INSTALLED: OnceCell<()> = OnceCell::new();

pub fn init() -> Result<(), String> {
    init_with_config(LoggerConfig::default())
}

/// Installs the logger. Once installed, further calls only replace the
/// configuration. Fails if a different logger was installed first.
pub fn init_with_config(config: LoggerConfig) -> Result<(), String> {
    INSTALLED.get_or_try_init(|| {
        log::set_logger(&*COMPLETION_LOGGER)
            .map_err(|e| format!("Failed to set logger: {:?}", e))
    })?;

    let max_level = config.min_level.to_level_filter();
    COMPLETION_LOGGER.update_config(config);
    log::set_max_level(max_level);
    Ok(())
}

pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn color(&self) -> Color {
        match self {
            LogLevel::Trace => Color::Cyan,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn to_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }

    pub fn to_level_filter(&self) -> LevelFilter {
        self.to_level().to_level_filter()
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub location: Option<String>,
}

impl LogEntry {
    fn from_record(record: &Record) -> Self {
        let location = match (record.file(), record.line()) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            _ => None,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level: LogLevel::from_level(record.level()),
            target: record.target().to_string(),
            message: record.args().to_string(),
            location,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub show_colors: bool,
    pub show_target: bool,
    pub show_location: bool,
    pub timestamp_format: String,
    pub output_json: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: true,
            show_target: true,
            show_location: false,
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            output_json: false,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.show_colors = enabled;
        self
    }

    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.output_json = enabled;
        self
    }

    pub fn production() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: false,
            output_json: true,
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            show_colors: true,
            show_location: true,
            output_json: false,
            ..Default::default()
        }
    }
}

pub struct CompletionLogger {
    config: RwLock<LoggerConfig>,
}

impl CompletionLogger {
    fn new() -> Self {
        Self {
            config: RwLock::new(LoggerConfig::default()),
        }
    }

    fn update_config(&self, new_config: LoggerConfig) {
        if let Ok(mut config) = self.config.write() {
            *config = new_config;
        }
    }

    fn format_line(entry: &LogEntry, config: &LoggerConfig) -> String {
        if config.output_json {
            return serde_json::to_string(entry).unwrap_or_default();
        }

        let timestamp = entry.timestamp.format(&config.timestamp_format).to_string();
        let level = format!("[{}]", entry.level.as_str());
        let mut line = if config.show_colors {
            format!(
                "{} {} ",
                timestamp.bright_black(),
                level.color(entry.level.color()).bold()
            )
        } else {
            format!("{} {} ", timestamp, level)
        };

        if config.show_target {
            let target = format!("{}: ", entry.target);
            if config.show_colors {
                line.push_str(&target.bright_blue().to_string());
            } else {
                line.push_str(&target);
            }
        }

        line.push_str(&entry.message);

        if config.show_location {
            if let Some(location) = &entry.location {
                let location = format!(" ({})", location);
                if config.show_colors {
                    line.push_str(&location.bright_black().to_string());
                } else {
                    line.push_str(&location);
                }
            }
        }

        line
    }
}

impl log::Log for CompletionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.config.read() {
            Ok(config) => metadata.level() <= config.min_level.to_level(),
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = LogEntry::from_record(record);
        if let Ok(config) = self.config.read() {
            let line = Self::format_line(&entry, &config);
            let _ = writeln!(io::stderr(), "{}", line);
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Logs how long an operation took when dropped.
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::debug!("Starting timer: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!(
            "Timer '{}' completed in {}ms",
            self.name,
            self.elapsed().as_millis()
        );
    }
}

pub fn timer(name: &str) -> Timer {
    Timer::new(name)
}

/// Logs the client configuration without the API key.
pub fn log_client_info(config: &ClientConfig) {
    log::info!("Completion client configuration:");
    log::info!(
        "   Base URL: {}",
        config.base_url.as_deref().unwrap_or("<unset>")
    );
    log::info!("   Engine: {}", config.engine.as_deref().unwrap_or("<unset>"));
    log::info!(
        "   API key: {}",
        if config.api_key.is_some() { "set" } else { "not set" }
    );
    if let Some(organization) = &config.organization {
        log::info!("   Organization: {}", organization);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel) -> LogEntry {
        LogEntry {
            id: "id-1".to_string(),
            timestamp: Utc::now(),
            level,
            target: "rcompletions::stream".to_string(),
            message: "decoded line".to_string(),
            location: Some("src/stream/mod.rs:10".to_string()),
        }
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(LogLevel::Info.as_str(), "INFO");
        assert_eq!(LogLevel::Debug.color(), Color::Blue);
        assert_eq!(LogLevel::Warn.to_level_filter(), LevelFilter::Warn);
        assert_eq!(LogLevel::from_level(Level::Error), LogLevel::Error);
        assert!(LogLevel::Trace < LogLevel::Error);
    }

    #[test]
    fn test_logger_config_presets() {
        let config = LoggerConfig::development();
        assert_eq!(config.min_level, LogLevel::Debug);
        assert!(config.show_colors);

        let prod_config = LoggerConfig::production();
        assert!(!prod_config.show_colors);
        assert!(prod_config.output_json);
    }

    #[test]
    fn test_plain_line_format() {
        let config = LoggerConfig::new().with_colors(false);
        let line = CompletionLogger::format_line(&entry(LogLevel::Warn), &config);

        assert!(line.contains("[WARN] rcompletions::stream: decoded line"));
        assert!(!line.contains("src/stream/mod.rs"));
    }

    #[test]
    fn test_json_line_format() {
        let config = LoggerConfig::production();
        let line = CompletionLogger::format_line(&entry(LogLevel::Info), &config);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["level"], "Info");
        assert_eq!(value["message"], "decoded line");
    }

    #[test]
    fn test_logger_initialization_repeat_call_updates_config() {
        assert!(init_with_config(LoggerConfig::development()).is_ok());
        assert!(is_installed());
        assert_eq!(log::max_level(), LevelFilter::Debug);

        assert!(init_with_config(LoggerConfig::new().with_level(LogLevel::Warn)).is_ok());
        assert!(is_installed());
        assert_eq!(log::max_level(), LevelFilter::Warn);
        assert!(!log::logger().enabled(&Metadata::builder().level(Level::Info).build()));
        assert!(log::logger().enabled(&Metadata::builder().level(Level::Error).build()));
    }
}
