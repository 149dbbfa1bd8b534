use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Opaque metadata produced by a format-specific field extractor.
///
/// The core never inspects it; ownership passes to the caller with the result.
pub type RawFields = serde_json::Map<String, serde_json::Value>;

/// Identifier of a file to extract from.
///
/// The reference is resolved into a readable handle by a `FileResolver`; for
/// the filesystem resolver it is a path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(String);

impl FileRef {
    pub fn new(reference: impl Into<String>) -> Self {
        FileRef(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileRef {
    fn from(value: &str) -> Self {
        FileRef::new(value)
    }
}

impl From<String> for FileRef {
    fn from(value: String) -> Self {
        FileRef(value)
    }
}

impl From<&Path> for FileRef {
    fn from(value: &Path) -> Self {
        FileRef(value.to_string_lossy().into_owned())
    }
}

/// Caller-supplied hint about a file's format (usually its extension).
///
/// Hints are normalised: surrounding whitespace and a leading `.` are dropped and
/// the value is lowercased, so `".MP4"` and `"mp4"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FormatHint(String);

impl FormatHint {
    pub const GENERIC: &'static str = "generic";

    pub fn new(hint: impl AsRef<str>) -> Self {
        let hint = hint.as_ref().trim().trim_start_matches('.');
        if hint.is_empty() {
            return Self::generic();
        }
        FormatHint(hint.to_ascii_lowercase())
    }

    pub fn generic() -> Self {
        FormatHint(Self::GENERIC.to_owned())
    }

    /// Derive a hint from a path's extension, falling back to `generic`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::new)
            .unwrap_or_else(Self::generic)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_generic(&self) -> bool {
        self.0 == Self::GENERIC
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatHint {
    fn from(value: &str) -> Self {
        FormatHint::new(value)
    }
}

impl From<String> for FormatHint {
    fn from(value: String) -> Self {
        FormatHint::new(value)
    }
}

impl From<FormatHint> for String {
    fn from(value: FormatHint) -> Self {
        value.0
    }
}

/// Scheduling priority. Higher priorities are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn all() -> [Priority; 4] {
        [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ]
    }
}

/// Outcome recorded for one attempt or one finished task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    Failed,
    /// An attempt failed and the task was queued again. Never terminal.
    Retried,
    TimedOut,
    Cancelled,
}

impl ExtractionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExtractionStatus::Retried)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::Retried => "retried",
            ExtractionStatus::TimedOut => "timed_out",
            ExtractionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hints_are_normalised() {
        assert_eq!(FormatHint::new(".MP4"), FormatHint::new("mp4"));
        assert_eq!(FormatHint::new("  "), FormatHint::generic());
        assert_eq!(FormatHint::from_path("/tmp/clip.MOV").as_str(), "mov");
        assert!(FormatHint::from_path("/tmp/no_extension").is_generic());
    }

    #[test]
    fn format_hint_round_trips_through_serde_normalised() {
        let hint: FormatHint = serde_json::from_str("\".WAV\"").unwrap();
        assert_eq!(hint.as_str(), "wav");
        assert_eq!(serde_json::to_string(&hint).unwrap(), "\"wav\"");
    }

    #[test]
    fn priorities_are_ordered() {
        let mut all = vec![Priority::High, Priority::Low, Priority::Critical, Priority::Normal];
        all.sort();
        assert_eq!(all, Priority::all());
    }
}
