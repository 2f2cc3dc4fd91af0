// Workflow Configuration Parser
// Decodes `.kiln/*.yml` documents into validated WorkflowDefinitions

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::models::{JobSpec, StepSpec, WorkflowDefinition};

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding workflow files, relative to the repository root
pub const CONFIG_DIRECTORY: &str = ".kiln";

/// Default workflow file name inside [`CONFIG_DIRECTORY`]
pub const DEFAULT_CONFIG_FILENAME: &str = "ci.yml";

/// Extensions recognised during discovery
pub const CONFIG_EXTENSIONS: &[&str] = &["yml", "yaml"];

/// Parser for kiln workflow files
pub struct ConfigParser;

impl ConfigParser {
    /// Default config path relative to the repository root
    pub fn default_config_path() -> PathBuf {
        Path::new(CONFIG_DIRECTORY).join(DEFAULT_CONFIG_FILENAME)
    }

    /// Load and validate one workflow file.
    ///
    /// `relative_path` must be relative to `repo_root`; `None` selects
    /// `.kiln/ci.yml`.
    pub fn load(repo_root: &Path, relative_path: Option<&Path>) -> ConfigResult<WorkflowDefinition> {
        let relative = relative_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if relative.is_absolute() {
            return Err(ConfigError::schema(
                "Pipeline configuration path must be relative to the repository root",
            ));
        }

        let path = repo_root.join(&relative);
        if !path.exists() {
            return Err(ConfigError::missing(format!(
                "Pipeline configuration file not found at {}",
                relative.display()
            )));
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::from_io_error(&e, &path))?;
        Self::parse(&content, &relative)
    }

    /// List every workflow file under `.kiln`, relative to `repo_root`,
    /// sorted and without duplicates.
    pub fn list_config_paths(repo_root: &Path) -> ConfigResult<Vec<PathBuf>> {
        let config_dir = repo_root.join(CONFIG_DIRECTORY);
        if !config_dir.is_dir() {
            return Err(ConfigError::missing(format!(
                "Pipeline configuration directory '{}' not found",
                CONFIG_DIRECTORY
            )));
        }

        let entries =
            fs::read_dir(&config_dir).map_err(|e| ConfigError::from_io_error(&e, &config_dir))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigError::from_io_error(&e, &config_dir))?;
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CONFIG_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if !matches || !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(repo_root) {
                paths.push(relative.to_path_buf());
            }
        }

        paths.sort();
        paths.dedup();

        if paths.is_empty() {
            return Err(ConfigError::missing(format!(
                "No pipeline configuration files found under '{}'",
                CONFIG_DIRECTORY
            )));
        }

        Ok(paths)
    }

    /// Load every workflow under `.kiln`; each file is parsed independently
    pub fn discover(repo_root: &Path) -> ConfigResult<Vec<WorkflowDefinition>> {
        Self::list_config_paths(repo_root)?
            .iter()
            .map(|relative| Self::load(repo_root, Some(relative)))
            .collect()
    }

    /// Parse a workflow document. `relative_path` is recorded on the result
    /// and its stem is the fallback workflow name.
    pub fn parse(content: &str, relative_path: &Path) -> ConfigResult<WorkflowDefinition> {
        let mut document: Value =
            serde_yaml::from_str(content).map_err(|e| ConfigError::from_yaml_error(&e))?;
        document
            .apply_merge()
            .map_err(|e| ConfigError::from_yaml_error(&e))?;

        let Value::Mapping(root) = document else {
            return Err(ConfigError::schema("Pipeline configuration must be a mapping"));
        };

        let jobs = parse_jobs(&root)?;

        let default_name = relative_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("pipeline")
            .to_string();

        let (name, dependencies) = parse_workflow_block(&root, &jobs, default_name)?;

        WorkflowDefinition::new(name, relative_path, jobs, dependencies)
    }
}

fn parse_jobs(root: &Mapping) -> ConfigResult<IndexMap<String, JobSpec>> {
    let jobs_section = match root.get("jobs") {
        Some(Value::Mapping(jobs)) if !jobs.is_empty() => jobs,
        _ => {
            return Err(
                ConfigError::schema("Pipeline configuration must define at least one job")
                    .with_field("jobs"),
            )
        }
    };

    let mut jobs = IndexMap::with_capacity(jobs_section.len());
    for (key, body) in jobs_section {
        let name = scalar_name(key)
            .ok_or_else(|| ConfigError::schema("Job names must be strings").with_field("jobs"))?;
        let spec = parse_job(&name, body)?;
        jobs.insert(name, spec);
    }

    Ok(jobs)
}

fn parse_job(name: &str, body: &Value) -> ConfigResult<JobSpec> {
    let Value::Mapping(body) = body else {
        return Err(ConfigError::schema(format!("Job '{}' must be a mapping", name)).with_job(name));
    };

    let image = match body.get("docker") {
        Some(Value::Sequence(images)) if !images.is_empty() => match &images[0] {
            Value::Mapping(first) => match first.get("image") {
                Some(Value::String(image)) => image.clone(),
                Some(_) => {
                    return Err(ConfigError::schema(format!(
                        "Job '{}' docker image value must be a string",
                        name
                    ))
                    .with_job(name)
                    .with_field("docker.image"))
                }
                None => {
                    return Err(ConfigError::schema(format!(
                        "Job '{}' docker definition must include an 'image'",
                        name
                    ))
                    .with_job(name)
                    .with_field("docker.image"))
                }
            },
            _ => {
                return Err(ConfigError::schema(format!(
                    "Job '{}' docker definition must include an 'image'",
                    name
                ))
                .with_job(name)
                .with_field("docker"))
            }
        },
        _ => {
            return Err(ConfigError::schema(format!(
                "Job '{}' must declare at least one docker image",
                name
            ))
            .with_job(name)
            .with_field("docker"))
        }
    };

    let steps_section = match body.get("steps") {
        Some(Value::Sequence(steps)) if !steps.is_empty() => steps,
        _ => {
            return Err(ConfigError::schema(format!(
                "Job '{}' must define at least one step",
                name
            ))
            .with_job(name)
            .with_field("steps"))
        }
    };

    let steps = steps_section
        .iter()
        .map(|raw| parse_step(name, raw))
        .collect::<ConfigResult<Vec<_>>>()?;

    Ok(JobSpec::new(name, image, steps))
}

fn parse_step(job: &str, raw: &Value) -> ConfigResult<StepSpec> {
    let invalid = |message: String| ConfigError::schema(message).with_job(job).with_field("steps");

    match raw {
        Value::String(marker) => {
            let marker = marker.trim();
            if marker == "checkout" {
                Ok(StepSpec::Checkout)
            } else {
                Err(invalid(format!("Unsupported step '{}'", marker)))
            }
        }
        Value::Mapping(mapping) => {
            if mapping.len() != 1 {
                return Err(invalid(format!(
                    "Unsupported step mapping with {} keys; expected a single 'run' key",
                    mapping.len()
                )));
            }
            let Some((key, value)) = mapping.iter().next() else {
                return Err(invalid("Empty step mapping".to_string()));
            };
            let kind = key.as_str().unwrap_or_default();
            if kind != "run" {
                return Err(invalid(format!("Unsupported step type '{}'", kind)));
            }

            let command = match value {
                Value::String(command) => Some(command.as_str()),
                Value::Mapping(run) => run.get("command").and_then(Value::as_str),
                _ => None,
            };

            match command {
                Some(command) if !command.trim().is_empty() => Ok(StepSpec::run(command)),
                _ => Err(invalid("Run step must define a non-empty command".to_string())),
            }
        }
        other => Err(invalid(format!("Unsupported step format: {:?}", other))),
    }
}

/// Extract the workflow name and `requires` edges from the optional
/// `workflows` block. Only the first workflow (ignoring `version`) is used.
fn parse_workflow_block(
    root: &Mapping,
    jobs: &IndexMap<String, JobSpec>,
    default_name: String,
) -> ConfigResult<(String, IndexMap<String, Vec<String>>)> {
    let mut dependencies: IndexMap<String, Vec<String>> =
        jobs.keys().map(|name| (name.clone(), Vec::new())).collect();

    let Some(Value::Mapping(workflows)) = root.get("workflows") else {
        return Ok((default_name, dependencies));
    };

    let Some((workflow_name, definition)) = workflows
        .iter()
        .find(|(key, _)| key.as_str() != Some("version"))
    else {
        return Ok((default_name, dependencies));
    };

    let workflow_name = scalar_name(workflow_name)
        .ok_or_else(|| ConfigError::schema("Workflow names must be strings").with_field("workflows"))?;

    let Value::Mapping(definition) = definition else {
        return Err(ConfigError::schema("Workflow definition must be a mapping").with_field("workflows"));
    };

    let entries = match definition.get("jobs") {
        Some(Value::Sequence(entries)) if !entries.is_empty() => entries,
        _ => {
            return Err(ConfigError::schema("Workflow must define a non-empty jobs list")
                .with_field("workflows.jobs"))
        }
    };

    for entry in entries {
        let (job_name, requires) = match entry {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                (scalar_name(entry).unwrap_or_default(), Vec::new())
            }
            Value::Mapping(mapping) if mapping.len() == 1 => {
                let Some((key, payload)) = mapping.iter().next() else {
                    return Err(ConfigError::schema("Empty workflow job declaration")
                        .with_field("workflows.jobs"));
                };
                let job_name = scalar_name(key).ok_or_else(|| {
                    ConfigError::schema("Workflow job names must be strings").with_field("workflows.jobs")
                })?;
                let requires = parse_requires(&job_name, payload)?;
                (job_name, requires)
            }
            other => {
                return Err(ConfigError::schema(format!(
                    "Unsupported workflow job declaration: {:?}",
                    other
                ))
                .with_field("workflows.jobs"))
            }
        };

        let Some(slot) = dependencies.get_mut(&job_name) else {
            return Err(ConfigError::unknown_job(format!(
                "Workflow references unknown job '{}'",
                job_name
            ))
            .with_job(job_name)
            .with_field("workflows.jobs"));
        };

        for dep in &requires {
            if !jobs.contains_key(dep) {
                return Err(ConfigError::unknown_job(format!(
                    "Job '{}' requires unknown job '{}'",
                    job_name, dep
                ))
                .with_job(job_name.clone())
                .with_field("requires"));
            }
        }

        *slot = requires;
    }

    Ok((workflow_name, dependencies))
}

fn parse_requires(job: &str, payload: &Value) -> ConfigResult<Vec<String>> {
    let Value::Mapping(payload) = payload else {
        return Err(ConfigError::schema(format!(
            "Workflow job '{}' must use a mapping configuration",
            job
        ))
        .with_job(job)
        .with_field("workflows.jobs"));
    };

    match payload.get("requires") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                scalar_name(item).ok_or_else(|| {
                    ConfigError::schema(format!("Workflow job '{}' has invalid requires list", job))
                        .with_job(job)
                        .with_field("requires")
                })
            })
            .collect(),
        Some(_) => Err(ConfigError::schema(format!(
            "Workflow job '{}' has invalid requires list",
            job
        ))
        .with_job(job)
        .with_field("requires")),
    }
}

fn scalar_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
