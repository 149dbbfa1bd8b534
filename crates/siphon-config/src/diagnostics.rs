use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Everything noticed while loading a config that did not stop it from loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Keys the schema does not know, as dotted paths (`scheduler.worker`).
    pub unknown_keys: Vec<String>,
    pub warnings: Vec<ConfigWarning>,
    /// Semantic problems the engine refuses to start with.
    pub errors: Vec<ConfigValidationError>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty() && self.warnings.is_empty() && self.errors.is_empty()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn extend_validation(&mut self, validation: ConfigDiagnostics) {
        self.unknown_keys.extend(validation.unknown_keys);
        self.warnings.extend(validation.warnings);
        self.errors.extend(validation.errors);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigWarning {
    #[error("{toml_path}: {message}")]
    InvalidValue { toml_path: String, message: String },
    #[error("logging.level `{value}` (read as `{normalized}`) is not a valid filter; falling back to `info`")]
    LoggingLevelInvalid { value: String, normalized: String },
    #[error("logging.file {}: parent directory does not exist", .path.display())]
    LogFileDirectoryMissing { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{toml_path}: {message}")]
    InvalidValue { toml_path: String, message: String },
}

impl ConfigValidationError {
    pub(crate) fn invalid(toml_path: &str, message: impl Into<String>) -> Self {
        ConfigValidationError::InvalidValue {
            toml_path: toml_path.to_owned(),
            message: message.into(),
        }
    }

    pub fn toml_path(&self) -> &str {
        match self {
            ConfigValidationError::InvalidValue { toml_path, .. } => toml_path,
        }
    }
}

pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut unknown = Vec::<String>::new();
    let deserializer = toml::de::Deserializer::new(text);
    let value = serde_ignored::deserialize(deserializer, |path| {
        unknown.push(path.to_string().trim_start_matches('.').to_owned());
    })?;
    unknown.sort();
    unknown.dedup();
    Ok((value, unknown))
}
