//! Line-oriented logger for deploy progress
//!
//! All output goes to stderr. Lines carry a severity tag and an optional
//! `[namespace/context]` prefix so interleaved CI logs stay attributable.

use std::io::{self, Write};

use console::style;

/// Log severity levels, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name from the `LEVEL` environment variable
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Styled line sink with severity filtering
#[derive(Debug, Clone)]
pub struct Logger {
    level: LogLevel,
    prefix: Option<String>,
}

impl Logger {
    /// Create a logger at the given level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            prefix: None,
        }
    }

    /// Derive the level from `LEVEL` / `DEBUG` environment variables
    pub fn from_env() -> Self {
        let level = if std::env::var_os("DEBUG").is_some() {
            LogLevel::Debug
        } else {
            std::env::var("LEVEL")
                .ok()
                .and_then(|v| LogLevel::parse(&v))
                .unwrap_or(LogLevel::Info)
        };
        Self::new(level)
    }

    /// Prefix every line with `[namespace/context]`
    #[must_use]
    pub fn with_prefix(mut self, namespace: &str, context: &str) -> Self {
        self.prefix = Some(format!("[{}/{}]", namespace, context));
        self
    }

    pub fn debug(&self, message: &str) {
        if self.level <= LogLevel::Debug {
            self.emit(&format!("{} {}", style("DEBUG").dim(), message));
        }
    }

    pub fn info(&self, message: &str) {
        if self.level <= LogLevel::Info {
            self.emit(message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.level <= LogLevel::Warn {
            self.emit(&format!("{} {}", style("⚠").yellow(), message));
        }
    }

    pub fn error(&self, message: &str) {
        if self.level <= LogLevel::Error {
            self.emit(&format!("{} {}", style("✗").red(), message));
        }
    }

    /// Phase heading, visually separated from surrounding lines
    pub fn heading(&self, message: &str) {
        if self.level <= LogLevel::Info {
            self.emit("");
            self.emit(&format!("{} {}", style("▶").cyan().bold(), style(message).bold()));
        }
    }

    /// Terminal success line
    pub fn success(&self, message: &str) {
        if self.level <= LogLevel::Info {
            self.emit(&format!("{} {}", style("✓").green().bold(), message));
        }
    }

    fn emit(&self, line: &str) {
        match &self.prefix {
            Some(prefix) if !line.is_empty() => {
                let _ = writeln!(io::stderr(), "{} {}", style(prefix).dim(), line);
            }
            _ => {
                let _ = writeln!(io::stderr(), "{}", line);
            }
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("nope"), None);
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_prefix_is_stored() {
        let logger = Logger::new(LogLevel::Info).with_prefix("apps", "minikube");
        assert_eq!(logger.prefix.as_deref(), Some("[apps/minikube]"));
    }
}
