// Container Runner
// Executes jobs inside Docker containers

use crate::config::{JobSpec, StepSpec};
use crate::runners::{Runner, RunnerError, RunnerResult};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Path the workspace is mounted at inside the container
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Configuration for container execution
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Docker-compatible CLI binary (name on PATH or absolute path)
    pub docker_binary: String,
    /// Target platform hint forwarded as `--platform`
    pub platform: Option<String>,
    /// Deadline for a single job; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            platform: None,
            timeout: None,
        }
    }
}

/// Container runner for Docker-based execution
pub struct ContainerRunner {
    config: ContainerConfig,
}

/// Job log accumulated in execution order
#[derive(Debug, Default)]
struct JobLog {
    buffer: String,
}

impl JobLog {
    fn line(&mut self, line: impl AsRef<str>) {
        self.buffer.push_str(line.as_ref());
        self.buffer.push('\n');
    }

    /// Append captured process output, newline-terminated
    fn capture(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);
        if !text.ends_with('\n') {
            self.buffer.push('\n');
        }
    }

    fn into_string(self) -> String {
        self.buffer
    }
}

/// Commands of a job folded into one shell invocation
#[derive(Debug, PartialEq, Eq)]
pub struct JobScript {
    /// `cmd1 && cmd2 && ...`, or `true` when there are no run steps
    pub script: String,
    /// Number of run steps folded into `script`
    pub run_steps: usize,
}

impl ContainerRunner {
    /// Create a new container runner with default configuration
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
        }
    }

    /// Create a container runner with custom configuration
    pub fn with_config(config: ContainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Check if the container engine answers
    pub async fn is_available(&self) -> bool {
        let output = Command::new(&self.config.docker_binary)
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}")
            .output()
            .await;

        output.map(|o| o.status.success()).unwrap_or(false)
    }

    /// Arguments for `docker run` executing `script` in `image`
    pub fn run_args(
        &self,
        container_name: &str,
        image: &str,
        workspace: &Path,
        script: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "-v".to_string(),
            format!("{}:{}", workspace.display(), CONTAINER_WORKSPACE),
            "-w".to_string(),
            CONTAINER_WORKSPACE.to_string(),
        ];

        if let Some(platform) = &self.config.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }

        args.push(image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(script.to_string());
        args
    }

    async fn spawn(&self, args: &[String]) -> std::io::Result<Output> {
        Command::new(&self.config.docker_binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }

    /// Force-remove a container left behind by a timed-out job
    async fn remove_container(&self, container_name: &str) {
        let result = Command::new(&self.config.docker_binary)
            .args(["rm", "-f", container_name])
            .output()
            .await;

        if let Err(e) = result {
            warn!(container = container_name, "Failed to remove container: {}", e);
        }
    }

    fn binary_available(&self) -> bool {
        which::which(&self.config.docker_binary).is_ok()
    }
}

impl Default for ContainerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Runner for ContainerRunner {
    async fn execute(&self, job: &JobSpec, workspace: &Path) -> Result<RunnerResult, RunnerError> {
        let mut log = JobLog::default();
        log.line(format!("[job] {}", job.name));
        log.line(format!("[image] {}", job.image));

        let mut commands: Vec<&str> = Vec::new();
        for step in &job.steps {
            match step {
                StepSpec::Checkout => log.line("[checkout] repository mounted into container"),
                StepSpec::Run { command } => {
                    let command = command.trim();
                    if command.is_empty() {
                        let message = format!("Run step missing command in job '{}'", job.name);
                        error!(job = %job.name, "{}", message);
                        log.line(message);
                        return Ok(RunnerResult::failure(log.into_string(), None));
                    }
                    log.line(format!("$ {}", command));
                    commands.push(command);
                }
            }
        }

        let script = build_script(&commands);
        if script.run_steps == 0 {
            log.line("[runner] no run steps defined; executing no-op");
        }

        if !self.binary_available() {
            error!(job = %job.name, binary = %self.config.docker_binary, "Docker binary not found");
            log.line(format!(
                "Docker binary not found: {}",
                self.config.docker_binary
            ));
            return Ok(RunnerResult::failure(log.into_string(), None));
        }

        let workspace = absolute_workspace(workspace);
        let container_name = container_name(&job.name);
        let args = self.run_args(&container_name, &job.image, &workspace, &script.script);
        debug!(job = %job.name, ?args, "Starting container");

        let output = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.spawn(&args)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job = %job.name, timeout_secs = limit.as_secs(), "Job exceeded timeout");
                    self.remove_container(&container_name).await;
                    log.line(format!("Job exceeded timeout of {}s", limit.as_secs()));
                    return Ok(RunnerResult::failure(log.into_string(), None));
                }
            },
            None => self.spawn(&args).await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!(job = %job.name, "Docker binary not found when executing job: {}", e);
                log.line(format!("Docker binary not found: {}", e));
                return Ok(RunnerResult::failure(log.into_string(), None));
            }
            Err(e) => {
                error!(job = %job.name, "Docker execution failed: {}", e);
                log.line(format!("Docker execution raised: {}", e));
                return Ok(RunnerResult::failure(log.into_string(), None));
            }
        };

        log.capture(&output.stdout);
        log.capture(&output.stderr);

        let result = match output.status.code() {
            Some(code) => {
                if code != 0 {
                    log.line(format!("Command exited with code {}", code));
                }
                RunnerResult::from_exit(log.into_string(), code)
            }
            None => {
                log.line("Command terminated by signal");
                RunnerResult::failure(log.into_string(), None)
            }
        };

        Ok(result)
    }
}

/// Fold run commands into a single `&&` chain so the first failure aborts
/// the rest and its exit code is reported
pub fn build_script(commands: &[&str]) -> JobScript {
    if commands.is_empty() {
        return JobScript {
            script: "true".to_string(),
            run_steps: 0,
        };
    }

    JobScript {
        script: commands.join(" && "),
        run_steps: commands.len(),
    }
}

fn absolute_workspace(workspace: &Path) -> PathBuf {
    workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf())
}

/// Unique, docker-safe container name for a job
fn container_name(job_name: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let sanitized: String = job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("kiln-{}-{:08x}{:04x}", sanitized, unique_suffix(), seq & 0xffff)
}

fn unique_suffix() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (nanos as u32) ^ std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_docker() -> ContainerRunner {
        ContainerRunner::with_config(ContainerConfig {
            docker_binary: "/nonexistent/kiln-docker".to_string(),
            ..ContainerConfig::default()
        })
    }

    #[test]
    fn test_build_script_joins_with_and() {
        let script = build_script(&["make", "make test"]);
        assert_eq!(script.script, "make && make test");
        assert_eq!(script.run_steps, 2);
    }

    #[test]
    fn test_build_script_without_commands_is_noop() {
        let script = build_script(&[]);
        assert_eq!(script.script, "true");
        assert_eq!(script.run_steps, 0);
    }

    #[test]
    fn test_run_args_mount_workspace() {
        let runner = ContainerRunner::new();
        let args = runner.run_args("kiln-build-1", "rust:1", Path::new("/tmp/ws"), "cargo test");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "kiln-build-1",
                "-v",
                "/tmp/ws:/workspace",
                "-w",
                "/workspace",
                "rust:1",
                "sh",
                "-c",
                "cargo test",
            ]
        );
    }

    #[test]
    fn test_run_args_forward_platform() {
        let runner = ContainerRunner::with_config(ContainerConfig {
            platform: Some("linux/amd64".to_string()),
            ..ContainerConfig::default()
        });
        let args = runner.run_args("c", "alpine", Path::new("/ws"), "true");
        let idx = args.iter().position(|a| a == "--platform").unwrap();
        assert_eq!(args[idx + 1], "linux/amd64");
        assert!(idx < args.iter().position(|a| a == "alpine").unwrap());
    }

    #[test]
    fn test_container_name_is_docker_safe() {
        let name = container_name("build & test/linux");
        assert!(name.starts_with("kiln-build---test-linux-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
        assert_ne!(container_name("a"), container_name("a"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_job_failure() {
        let temp = tempfile::tempdir().unwrap();
        let job = JobSpec::new(
            "build",
            "alpine",
            vec![StepSpec::Checkout, StepSpec::run("echo hi")],
        );

        let result = missing_docker().execute(&job, temp.path()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.output.starts_with("[job] build\n[image] alpine\n"));
        assert!(result.output.contains("[checkout] repository mounted into container\n"));
        assert!(result.output.contains("$ echo hi\n"));
        assert!(result.output.contains("Docker binary not found"));
    }

    #[tokio::test]
    async fn test_empty_command_fails_without_spawning() {
        let temp = tempfile::tempdir().unwrap();
        let job = JobSpec::new(
            "lint",
            "alpine",
            vec![StepSpec::run("echo ok"), StepSpec::run("   ")],
        );

        let result = missing_docker().execute(&job, temp.path()).await.unwrap();

        assert!(!result.success);
        assert!(result.output.contains("Run step missing command in job 'lint'"));
        // Rejected before the engine lookup
        assert!(!result.output.contains("Docker binary not found"));
    }

    #[tokio::test]
    async fn test_checkout_only_job_logs_noop() {
        let temp = tempfile::tempdir().unwrap();
        let job = JobSpec::new("noop", "alpine", vec![StepSpec::Checkout]);

        let result = missing_docker().execute(&job, temp.path()).await.unwrap();

        assert!(result
            .output
            .contains("[runner] no run steps defined; executing no-op\n"));
    }

    #[tokio::test]
    async fn test_docker_availability_check() {
        // Only verifies the check does not panic
        let _ = ContainerRunner::new().is_available().await;
    }
}
