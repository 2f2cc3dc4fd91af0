use crate::config::error::{ConfigError, ConfigResult};
use crate::config::resolver::resolve_order;

use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One unit of work inside a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepSpec {
    /// Marker step; the workspace is populated before the job starts
    Checkout,
    /// Shell command executed inside the job container
    Run { command: String },
}

impl StepSpec {
    pub fn run(command: impl Into<String>) -> Self {
        StepSpec::Run {
            command: command.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepSpec::Checkout => "checkout",
            StepSpec::Run { .. } => "run",
        }
    }
}

/// A named job bound to a container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub image: String,
    pub steps: Vec<StepSpec>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            steps,
        }
    }

    /// Commands of all `run` steps, in declaration order
    pub fn run_commands(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            StepSpec::Run { command } => Some(command.as_str()),
            StepSpec::Checkout => None,
        })
    }
}

/// Jobs and dependency edges of one configuration file, with a resolved
/// execution order. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDefinition {
    name: String,
    config_path: PathBuf,
    jobs: IndexMap<String, JobSpec>,
    dependencies: IndexMap<String, Vec<String>>,
    execution_order: Vec<String>,
}

impl WorkflowDefinition {
    /// Build a workflow, resolving its execution order.
    ///
    /// Every job gets an entry in the dependency map (empty when it has no
    /// `requires`). Fails if an edge names an undeclared job or if the
    /// dependencies contain a cycle.
    pub fn new(
        name: impl Into<String>,
        config_path: impl Into<PathBuf>,
        jobs: IndexMap<String, JobSpec>,
        dependencies: IndexMap<String, Vec<String>>,
    ) -> ConfigResult<Self> {
        if jobs.is_empty() {
            return Err(
                ConfigError::schema("Pipeline configuration must define at least one job")
                    .with_field("jobs"),
            );
        }

        let mut edges: IndexMap<String, Vec<String>> = jobs
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        for (job, requires) in dependencies {
            let Some(slot) = edges.get_mut(&job) else {
                return Err(ConfigError::unknown_job(format!(
                    "Workflow references unknown job '{}'",
                    job
                ))
                .with_job(job));
            };
            for dep in &requires {
                if !jobs.contains_key(dep) {
                    return Err(ConfigError::unknown_job(format!(
                        "Job '{}' requires unknown job '{}'",
                        job, dep
                    ))
                    .with_job(job.clone())
                    .with_field("requires"));
                }
            }
            *slot = requires;
        }

        let execution_order = resolve_order(jobs.keys().map(String::as_str), &edges)?;

        Ok(Self {
            name: name.into(),
            config_path: config_path.into(),
            jobs,
            dependencies: edges,
            execution_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Config file path relative to the repository root
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn jobs(&self) -> &IndexMap<String, JobSpec> {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name)
    }

    /// Declared `requires` edges; every job has an entry
    pub fn dependencies(&self) -> &IndexMap<String, Vec<String>> {
        &self.dependencies
    }

    pub fn requires(&self, job: &str) -> &[String] {
        self.dependencies
            .get(job)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Topological order consistent with every `requires` edge
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Jobs paired with their specs in execution order
    pub fn ordered_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.execution_order
            .iter()
            .filter_map(|name| self.jobs.get(name))
    }
}
