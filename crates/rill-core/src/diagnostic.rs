//! Build diagnostics.
//!
//! A [`LogEntry`] carries a message plus optional position information.
//! Entries attached to a file are localized first: the owning file fills in
//! the path and, when a source map is present, rewrites the position to the
//! original source. Rendering goes through `tracing` at the entry's
//! severity.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One diagnostic. Positions are zero-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    /// Processor that produced the diagnostic, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Excerpt of the offending line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            plugin: None,
            path: None,
            content: None,
            start_line: None,
            start_column: None,
            end_line: None,
            end_column: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_start(mut self, line: u32, column: u32) -> Self {
        self.start_line = Some(line);
        self.start_column = Some(column);
        self
    }

    pub fn with_end(mut self, line: u32, column: u32) -> Self {
        self.end_line = Some(line);
        self.end_column = Some(column);
        self
    }

    /// `path(line,col): ` prefix for rendering, 1-based for humans.
    fn location_prefix(&self) -> String {
        let mut out = String::new();
        if let Some(path) = &self.path {
            out.push_str(&path.display().to_string());
            if let (Some(line), Some(col)) = (self.start_line, self.start_column) {
                out.push_str(&format!("({},{})", line + 1, col + 1));
            }
            out.push_str(": ");
        }
        out
    }

    /// Render through `tracing` at this entry's severity.
    pub fn emit(&self) {
        let prefix = self.location_prefix();
        match (self.severity, &self.plugin) {
            (Severity::Error, Some(p)) => tracing::error!("{}{} [{}]", prefix, self.message, p),
            (Severity::Error, None) => tracing::error!("{}{}", prefix, self.message),
            (Severity::Warning, Some(p)) => tracing::warn!("{}{} [{}]", prefix, self.message, p),
            (Severity::Warning, None) => tracing::warn!("{}{}", prefix, self.message),
            (Severity::Info, Some(p)) => tracing::info!("{}{} [{}]", prefix, self.message, p),
            (Severity::Info, None) => tracing::info!("{}{}", prefix, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let entry = LogEntry::error("boom")
            .with_plugin("minify")
            .with_path("/src/a.js")
            .with_start(2, 4);
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.plugin.as_deref(), Some("minify"));
        assert_eq!(entry.start_line, Some(2));
    }

    #[test]
    fn test_location_prefix_is_one_based() {
        let entry = LogEntry::warning("w").with_path("a.js").with_start(0, 0);
        assert_eq!(entry.location_prefix(), "a.js(1,1): ");
    }

    #[test]
    fn test_serde_roundtrip() {
        let entry = LogEntry::error("e").with_path("a.js").with_start(1, 2);
        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
