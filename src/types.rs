//! Core data model shared across the orchestrator
//!
//! Sessions own containers according to a placement strategy; executions
//! describe what to run and how streams should be delivered back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How a session places code runs onto containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementStrategy {
    /// A fresh container per `execute_code` call, removed afterwards
    PerExecution,
    /// One container owned by the session, reused across runs
    #[default]
    PerSession,
    /// Containers borrowed from and returned to the warm pool
    Pool,
}

impl std::str::FromStr for PlacementStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-execution" | "per_execution" | "execution" => Ok(PlacementStrategy::PerExecution),
            "per-session" | "per_session" | "session" => Ok(PlacementStrategy::PerSession),
            "pool" => Ok(PlacementStrategy::Pool),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid placement strategy: {}. Valid: per-execution, per-session, pool",
                s
            ))),
        }
    }
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::PerExecution => write!(f, "per-execution"),
            PlacementStrategy::PerSession => write!(f, "per-session"),
            PlacementStrategy::Pool => write!(f, "pool"),
        }
    }
}

/// Whether runs in a session share one workspace directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceSharing {
    /// Fresh workspace per container replacement
    #[default]
    Isolated,
    /// One persistent workspace for the whole session (per-session only)
    Shared,
}

/// Kind of a caller-supplied mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Single file, bound read-only
    File,
    /// Existing host directory, bound read-write
    Directory,
    /// Zip archive, extracted to a scratch directory and bound read-write
    Zip,
}

/// A caller-supplied bind mount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMount {
    /// Mount kind
    pub kind: MountKind,
    /// Host source path (file, directory, or archive)
    pub source: PathBuf,
    /// Absolute target path inside the container
    pub target: String,
}

impl ContainerMount {
    /// Bind a host file read-only
    pub fn file(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        ContainerMount {
            kind: MountKind::File,
            source: source.into(),
            target: target.into(),
        }
    }

    /// Bind a host directory read-write
    pub fn directory(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        ContainerMount {
            kind: MountKind::Directory,
            source: source.into(),
            target: target.into(),
        }
    }

    /// Extract a zip archive and bind the result as a directory
    pub fn zip(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        ContainerMount {
            kind: MountKind::Zip,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Container configuration carried by a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image override; the language plugin's default applies when unset
    #[serde(default)]
    pub image: Option<String>,
    /// Caller-supplied mounts in addition to the workspace bind
    #[serde(default)]
    pub mounts: Vec<ContainerMount>,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Explicit container name; generated when unset
    #[serde(default)]
    pub name: Option<String>,
    /// Memory cap override, e.g. "512m", "1g", "512k" or raw bytes
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// CPU cap override as a fractional CPU count
    #[serde(default)]
    pub cpu_limit: Option<f64>,
}

/// Session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Placement strategy governing container lifetime
    #[serde(default)]
    pub strategy: PlacementStrategy,
    /// Container configuration
    #[serde(default)]
    pub container: ContainerConfig,
    /// Requested session id; generated when unset
    #[serde(default)]
    pub session_id: Option<String>,
    /// Fail instead of returning an existing session with the requested id
    #[serde(default)]
    pub enforce_new_session: bool,
}

impl SessionConfig {
    /// Create a config with the given strategy
    pub fn new(strategy: PlacementStrategy) -> Self {
        SessionConfig {
            strategy,
            ..Default::default()
        }
    }

    /// Set the image override
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.container.image = Some(image.into());
        self
    }

    /// Add a mount
    pub fn with_mount(mut self, mount: ContainerMount) -> Self {
        self.container.mounts.push(mount);
        self
    }

    /// Request a specific session id
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }
}

/// Run an existing entry file from a mounted directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunApp {
    /// Entry file relative to `cwd`
    pub entry_file: String,
    /// Working directory; must equal a directory mount target
    pub cwd: String,
}

/// Receiver for live output chunks
///
/// Invoked synchronously from the stream reader; chunks arrive in emission
/// order and are never reordered. Implementations may drop chunks but must
/// not block for long.
pub trait OutputSink: Send + Sync {
    /// Receive one opaque chunk
    fn write(&self, chunk: &[u8]);
}

impl<F> OutputSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn write(&self, chunk: &[u8]) {
        self(chunk)
    }
}

/// Optional live sinks for the run and dependency-install phases
#[derive(Clone, Default)]
pub struct StreamSinks {
    /// Run stdout
    pub stdout: Option<Arc<dyn OutputSink>>,
    /// Run stderr
    pub stderr: Option<Arc<dyn OutputSink>>,
    /// Dependency-install stdout
    pub dependency_stdout: Option<Arc<dyn OutputSink>>,
    /// Dependency-install stderr
    pub dependency_stderr: Option<Arc<dyn OutputSink>>,
}

impl fmt::Debug for StreamSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSinks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("dependency_stdout", &self.dependency_stdout.is_some())
            .field("dependency_stderr", &self.dependency_stderr.is_some())
            .finish()
    }
}

/// Options for a single `execute_code` call
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Language name resolved against the registry
    pub language: String,
    /// Inline snippet; mutually exclusive with `run_app`
    pub code: Option<String>,
    /// Run an existing app entry file instead of an inline snippet
    pub run_app: Option<RunApp>,
    /// Dependency tokens interpreted by the language plugin
    pub dependencies: Vec<String>,
    /// Per-execution memory override
    pub memory_limit: Option<String>,
    /// Per-execution CPU override
    pub cpu_limit: Option<f64>,
    /// Bound on the exec phase
    pub timeout: Option<Duration>,
    /// Live output sinks
    pub sinks: StreamSinks,
    /// Workspace sharing mode for this run
    pub workspace_sharing: WorkspaceSharing,
    /// Per-execution strategy only: keep generated files when tearing down
    pub keep_generated_files: bool,
}

impl ExecutionOptions {
    /// Create options for an inline snippet
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        ExecutionOptions {
            language: language.into(),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Create options for run-app mode
    pub fn run_app(
        language: impl Into<String>,
        entry_file: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        ExecutionOptions {
            language: language.into(),
            run_app: Some(RunApp {
                entry_file: entry_file.into(),
                cwd: cwd.into(),
            }),
            ..Default::default()
        }
    }

    /// Set the dependency list
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the exec timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the workspace sharing mode
    pub fn with_workspace_sharing(mut self, sharing: WorkspaceSharing) -> Self {
        self.workspace_sharing = sharing;
        self
    }
}

/// Captured output of one exec
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code; 1 when the runtime reports none
    pub exit_code: i64,
}

impl ExecOutput {
    /// An empty, successful output
    pub fn empty() -> Self {
        ExecOutput::default()
    }

    /// Whether the exec exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-container state inside a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMeta {
    /// Owning session
    pub session_id: String,
    /// Runtime container id
    pub container_id: String,
    /// Generated container name (`rb_` prefixed)
    pub container_name: String,
    /// Image the container was created from
    pub image: String,
    /// Host directory bound at `/workspace`
    pub workspace_dir: PathBuf,
    /// Most recent successful dependency install matched `deps_checksum`
    pub deps_installed: bool,
    /// Hash of the sorted dependency list; empty when none
    pub deps_checksum: String,
    /// Workspace paths present immediately before user code last started
    pub baseline_files: HashSet<PathBuf>,
    /// Files generated by the last run
    pub generated_files: HashSet<PathBuf>,
    /// Union of generated files across all runs in the session
    pub session_generated_files: HashSet<PathBuf>,
    /// An exec is currently in flight
    pub is_running: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time a run began on this container
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl ContainerMeta {
    /// Fresh metadata for a newly created or acquired container
    pub fn new(
        session_id: impl Into<String>,
        container_id: impl Into<String>,
        container_name: impl Into<String>,
        image: impl Into<String>,
        workspace_dir: PathBuf,
    ) -> Self {
        ContainerMeta {
            session_id: session_id.into(),
            container_id: container_id.into(),
            container_name: container_name.into(),
            image: image.into(),
            workspace_dir,
            deps_installed: false,
            deps_checksum: String::new(),
            baseline_files: HashSet::new(),
            generated_files: HashSet::new(),
            session_generated_files: HashSet::new(),
            is_running: false,
            created_at: Utc::now(),
            last_executed_at: None,
        }
    }
}

/// Derived, read-only view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub session_id: String,
    /// Placement strategy
    pub strategy: PlacementStrategy,
    /// Current container id, if any
    pub current_container: Option<String>,
    /// Number of containers that ever served the session
    pub container_count: usize,
    /// Earliest container creation time, or the session's own
    pub created_at: DateTime<Utc>,
    /// Latest run start across all containers
    pub last_executed_at: Option<DateTime<Utc>>,
    /// A container exists and is currently executing
    pub is_active: bool,
}

/// Result of one `execute_code` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// User code stdout
    pub stdout: String,
    /// User code stderr
    pub stderr: String,
    /// Dependency-install stdout (empty on cache hit)
    pub dependency_stdout: String,
    /// Dependency-install stderr
    pub dependency_stderr: String,
    /// User code exit code; 1 when the runtime reports none
    pub exit_code: i64,
    /// Wall-clock duration of the call in milliseconds
    pub execution_time_ms: u64,
    /// Host workspace directory of the run
    pub workspace_dir: PathBuf,
    /// Files generated by this run
    pub generated_files: Vec<PathBuf>,
    /// Files generated across all runs in the session
    pub session_generated_files: Vec<PathBuf>,
}

/// Engine verbosity for per-phase diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Phase summaries only
    #[default]
    Info,
    /// Per-phase diagnostics promoted to info level
    Debug,
}

impl std::str::FromStr for Verbosity {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Verbosity::Info),
            "debug" => Ok(Verbosity::Debug),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid verbosity: {}. Valid: info, debug",
                s
            ))),
        }
    }
}

/// Parse a memory limit string (e.g. "512m", "1g", "512k" or raw bytes) to bytes
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    // Longer suffixes first so "gb" is not consumed as a bare "b"
    const SCALES: [(&str, i64); 6] = [
        ("gb", 1 << 30),
        ("mb", 1 << 20),
        ("kb", 1 << 10),
        ("g", 1 << 30),
        ("m", 1 << 20),
        ("k", 1 << 10),
    ];

    let spec = limit.trim().to_ascii_lowercase();
    for (suffix, scale) in SCALES {
        if let Some(digits) = spec.strip_suffix(suffix) {
            return digits.parse::<i64>().ok().map(|value| value * scale);
        }
    }
    spec.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("512k"), Some(512 * 1024));
        assert_eq!(parse_memory_limit("2048"), Some(2048));
        assert_eq!(parse_memory_limit("oops"), None);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "pool".parse::<PlacementStrategy>().unwrap(),
            PlacementStrategy::Pool
        );
        assert_eq!(
            "per-session".parse::<PlacementStrategy>().unwrap(),
            PlacementStrategy::PerSession
        );
        assert_eq!(
            "per_execution".parse::<PlacementStrategy>().unwrap(),
            PlacementStrategy::PerExecution
        );
        assert!("sideways".parse::<PlacementStrategy>().is_err());
    }

    #[test]
    fn test_execution_options_builder() {
        let opts = ExecutionOptions::new("python", "print(1)")
            .with_dependencies(["requests"])
            .with_timeout(Duration::from_secs(5))
            .with_workspace_sharing(WorkspaceSharing::Shared);

        assert_eq!(opts.language, "python");
        assert_eq!(opts.code.as_deref(), Some("print(1)"));
        assert_eq!(opts.dependencies, vec!["requests".to_string()]);
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.workspace_sharing, WorkspaceSharing::Shared);
    }

    #[test]
    fn test_sink_closure_impl() {
        use std::sync::Mutex;
        let collected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let inner = collected.clone();
        let sink: Arc<dyn OutputSink> = Arc::new(move |chunk: &[u8]| {
            inner.lock().unwrap().extend_from_slice(chunk);
        });
        sink.write(b"hello ");
        sink.write(b"world");
        assert_eq!(&*collected.lock().unwrap(), b"hello world");
    }
}
