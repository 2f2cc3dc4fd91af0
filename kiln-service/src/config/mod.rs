// Config Module
// Workflow file parsing, validation and dependency resolution

pub mod error;
pub mod models;
pub mod parser;
pub mod resolver;

pub use error::{ConfigError, ConfigErrorKind, ConfigResult};
pub use models::{JobSpec, StepSpec, WorkflowDefinition};
pub use parser::{ConfigParser, CONFIG_DIRECTORY, DEFAULT_CONFIG_FILENAME};
pub use resolver::resolve_order;
