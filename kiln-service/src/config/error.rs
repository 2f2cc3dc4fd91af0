// Configuration error types
// Every rejection names the offending job and field when one is known

use std::fmt;

/// Error raised while loading or resolving a workflow configuration
#[derive(Debug, Clone)]
pub struct ConfigError {
    /// Error message
    pub message: String,
    /// The kind of error
    pub kind: ConfigErrorKind,
    /// Job the error refers to, if any
    pub job: Option<String>,
    /// Field the error refers to, if any
    pub field: Option<String>,
    /// Line number (1-indexed) for YAML syntax errors
    pub line: Option<usize>,
    /// Column number (1-indexed) for YAML syntax errors
    pub column: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// YAML syntax error
    Yaml,
    /// IO error while reading the configuration
    Io,
    /// Configuration directory or file is absent
    MissingConfig,
    /// Document has the wrong shape (wrong types, missing fields)
    InvalidSchema,
    /// Reference to a job that is not declared
    UnknownJob,
    /// Dependencies can never be satisfied
    CyclicDependency,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            job: None,
            field: None,
            line: None,
            column: None,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::InvalidSchema, message)
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::MissingConfig, message)
    }

    pub fn unknown_job(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::UnknownJob, message)
    }

    pub fn cyclic(message: impl Into<String>) -> Self {
        Self::new(ConfigErrorKind::CyclicDependency, message)
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Create from a serde_yaml error, keeping the location when known
    pub fn from_yaml_error(err: &serde_yaml::Error) -> Self {
        let mut error = Self::new(
            ConfigErrorKind::Yaml,
            format!("invalid YAML in pipeline configuration: {}", err),
        );
        if let Some(location) = err.location() {
            error.line = Some(location.line());
            error.column = Some(location.column());
        }
        error
    }

    pub fn from_io_error(err: &std::io::Error, path: &std::path::Path) -> Self {
        Self::new(
            ConfigErrorKind::Io,
            format!("failed to read {}: {}", path.display(), err),
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        match (&self.job, &self.field) {
            (Some(job), Some(field)) => write!(f, " (job '{}', field '{}')", job, field)?,
            (Some(job), None) => write!(f, " (job '{}')", job)?,
            (None, Some(field)) => write!(f, " (field '{}')", field)?,
            (None, None) => {}
        }

        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, " at line {}:{}", line, column)?;
        }

        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = Result<T, ConfigError>;
