//! Execution engine
//!
//! Orchestrates the language registry, the container manager, and the
//! session manager into the `execute_code` pipeline: container acquisition
//! per placement strategy, workspace preparation, checksum-cached dependency
//! installation, exec with live stream demultiplexing, generated-file
//! accounting, and strategy-specific teardown.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::container::{
    images_match, ContainerHandle, ContainerManager, PoolConfig, DEFAULT_CPU_LIMIT,
    DEFAULT_MEMORY_BYTES, WORKSPACE_MOUNT,
};
use crate::error::{Error, Result};
use crate::languages::{self, InstallContext, LanguagePlugin};
use crate::session::SessionManager;
use crate::types::{
    parse_memory_limit, ContainerMeta, ExecOutput, ExecutionOptions, ExecutionResult,
    MountKind, PlacementStrategy, RunApp, SessionConfig, Verbosity, WorkspaceSharing,
};
use crate::workspace;

/// Sha256 over the sorted dependency list; empty string for no dependencies
pub fn dependency_checksum(dependencies: &[String]) -> String {
    if dependencies.is_empty() {
        return String::new();
    }
    let mut sorted = dependencies.to_vec();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reject strategy/sharing combinations and empty run targets up front
fn validate_options(config: &SessionConfig, options: &ExecutionOptions) -> Result<()> {
    if options.workspace_sharing == WorkspaceSharing::Shared
        && config.strategy != PlacementStrategy::PerSession
    {
        return Err(Error::Config(format!(
            "shared workspace sharing requires the per-session strategy, not {}",
            config.strategy
        )));
    }
    if options.code.is_none() && options.run_app.is_none() {
        return Err(Error::Config(
            "either inline code or run_app must be provided".to_string(),
        ));
    }
    Ok(())
}

/// The run-app working directory must be the target of a directory mount
fn run_app_workdir(config: &SessionConfig, run_app: &RunApp) -> Result<String> {
    let mounted = config
        .container
        .mounts
        .iter()
        .any(|m| m.kind == MountKind::Directory && m.target == run_app.cwd);
    if !mounted {
        return Err(Error::Config(format!(
            "run_app cwd {} does not match any directory mount target",
            run_app.cwd
        )));
    }
    Ok(run_app.cwd.clone())
}

fn handle_from(meta: &ContainerMeta) -> ContainerHandle {
    ContainerHandle {
        id: meta.container_id.clone(),
        name: meta.container_name.clone(),
        image: meta.image.clone(),
        workspace_dir: meta.workspace_dir.clone(),
    }
}

fn sorted(paths: &std::collections::HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut v: Vec<PathBuf> = paths.iter().cloned().collect();
    v.sort();
    v
}

/// The orchestration engine
pub struct ExecutionEngine {
    containers: ContainerManager,
    sessions: SessionManager,
    debug: AtomicBool,
}

impl ExecutionEngine {
    /// Connect to Docker with default pool bounds
    pub async fn new() -> Result<Self> {
        Self::with_pool_config(PoolConfig::default()).await
    }

    /// Connect to Docker with explicit pool bounds
    pub async fn with_pool_config(pool_config: PoolConfig) -> Result<Self> {
        Ok(ExecutionEngine {
            containers: ContainerManager::new(pool_config).await?,
            sessions: SessionManager::new(),
            debug: AtomicBool::new(false),
        })
    }

    /// Set per-phase diagnostic verbosity
    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.debug
            .store(verbosity == Verbosity::Debug, Ordering::Relaxed);
    }

    fn phase(&self, message: &str) {
        if self.debug.load(Ordering::Relaxed) {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    /// Create a session, returning its id
    ///
    /// An existing requested id is returned as-is unless the config enforces
    /// a new session.
    pub fn create_session(&self, config: SessionConfig) -> Result<String> {
        let id = self.sessions.create(config)?;
        self.phase(&format!("Created session {}", id));
        Ok(id)
    }

    /// Run code in the session per its placement strategy
    pub async fn execute_code(
        &self,
        session_id: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();

        // Step 1: validate
        let config = self.sessions.config(session_id)?;
        validate_options(&config, &options)?;
        let plugin = languages::get(&options.language).ok_or_else(|| {
            Error::Language(format!("unknown language: {}", options.language))
        })?;

        // Step 2: resolve image, session override first
        let image = config
            .container
            .image
            .clone()
            .unwrap_or_else(|| plugin.default_image().to_string());

        // Step 3: acquire container and workspace
        let meta = self
            .acquire_container(session_id, &config, &options, &image)
            .await?;
        self.phase(&format!(
            "Session {} using container {} ({})",
            session_id, meta.container_name, image
        ));

        // Steps 4-9; failures clear the running flag but leave the container
        // for inspection unless the strategy mandates teardown
        let (meta, dep_out, output) = self
            .run_prepared(&config, &options, plugin.as_ref(), meta)
            .await?;

        // Step 10: build the result, then return or retain per strategy
        let result = ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            dependency_stdout: dep_out.stdout,
            dependency_stderr: dep_out.stderr,
            exit_code: output.exit_code,
            execution_time_ms: started.elapsed().as_millis() as u64,
            workspace_dir: meta.workspace_dir.clone(),
            generated_files: sorted(&meta.generated_files),
            session_generated_files: sorted(&meta.session_generated_files),
        };

        if config.strategy == PlacementStrategy::PerExecution {
            let handle = handle_from(&meta);
            self.sessions.deregister_container(&meta.container_id);
            if options.keep_generated_files {
                if let Err(e) =
                    workspace::prune_except(&meta.workspace_dir, &meta.session_generated_files)
                {
                    warn!("Failed to prune workspace {}: {}", meta.workspace_dir.display(), e);
                }
                self.containers.remove_container_and_dir(&handle, false).await;
            } else {
                self.containers.remove_container_and_dir(&handle, true).await;
            }
            self.sessions.remove_session(session_id);
            self.phase(&format!("Removed one-shot container {}", handle.name));
        }

        Ok(result)
    }

    /// Steps 4 through 9 against an acquired container
    async fn run_prepared(
        &self,
        config: &SessionConfig,
        options: &ExecutionOptions,
        plugin: &dyn LanguagePlugin,
        mut meta: ContainerMeta,
    ) -> Result<(ContainerMeta, ExecOutput, ExecOutput)> {
        // Materialize the snippet and manifests before the baseline so they
        // are never reported as generated
        if options.run_app.is_none() {
            plugin.materialize(options, &meta.workspace_dir)?;
        }

        // Step 4: resource caps, always applied so pool reuse never inherits
        // a previous borrower's override
        let memory_bytes = options
            .memory_limit
            .as_deref()
            .or(config.container.memory_limit.as_deref())
            .and_then(parse_memory_limit)
            .unwrap_or(DEFAULT_MEMORY_BYTES);
        let cpu_limit = options
            .cpu_limit
            .or(config.container.cpu_limit)
            .unwrap_or(DEFAULT_CPU_LIMIT);
        if let Err(e) = self
            .containers
            .update_resources(&meta.container_name, memory_bytes, cpu_limit)
            .await
        {
            warn!(
                "Failed to update resource caps on {}: {}",
                meta.container_name, e
            );
        }

        let outcome = self
            .install_and_execute(config, options, plugin, &mut meta)
            .await;

        match outcome {
            Ok((dep_out, output)) => {
                // Step 9: post-run accounting
                let current = workspace::collect_files(&meta.workspace_dir)?;
                let generated =
                    workspace::generated_since(&current, &meta.baseline_files, &meta.workspace_dir);
                meta.session_generated_files.extend(generated.iter().cloned());
                meta.generated_files = generated;
                meta.is_running = false;
                self.sessions.store_meta(meta.clone());
                Ok((meta, dep_out, output))
            }
            Err(e) => {
                self.sessions
                    .update_container_state(&meta.container_id, false);
                Err(e)
            }
        }
    }

    /// Steps 5 through 8
    async fn install_and_execute(
        &self,
        config: &SessionConfig,
        options: &ExecutionOptions,
        plugin: &dyn LanguagePlugin,
        meta: &mut ContainerMeta,
    ) -> Result<(ExecOutput, ExecOutput)> {
        // Step 5: baseline before any user code
        meta.baseline_files = workspace::collect_files(&meta.workspace_dir)?;

        let install_workdir = options
            .run_app
            .as_ref()
            .map(|r| r.cwd.clone())
            .unwrap_or_else(|| WORKSPACE_MOUNT.to_string());

        // Step 6: dependency phase with checksum cache
        let checksum = dependency_checksum(&options.dependencies);
        let mut dep_out = ExecOutput::empty();
        if meta.deps_installed && meta.deps_checksum == checksum {
            self.phase(&format!(
                "Dependency cache hit on {}",
                meta.container_name
            ));
        } else if options.dependencies.is_empty() {
            meta.deps_installed = true;
            meta.deps_checksum = checksum;
        } else {
            let ctx = InstallContext {
                containers: &self.containers,
                container_id: &meta.container_id,
                dependencies: &options.dependencies,
                working_dir: &install_workdir,
                stdout_sink: options.sinks.dependency_stdout.as_ref(),
                stderr_sink: options.sinks.dependency_stderr.as_ref(),
            };
            match plugin.install_dependencies(&ctx).await? {
                Some(output) => {
                    if output.success() {
                        meta.deps_installed = true;
                        meta.deps_checksum = checksum;
                        // Installer artifacts must not count as generated
                        meta.baseline_files = workspace::collect_files(&meta.workspace_dir)?;
                    } else {
                        warn!(
                            "Dependency install exited {} on {}",
                            output.exit_code, meta.container_name
                        );
                    }
                    dep_out = output;
                }
                None => {
                    meta.deps_installed = true;
                    meta.deps_checksum = checksum;
                }
            }
        }

        // Step 7: prepare the run target
        let (workdir, cmd) = match &options.run_app {
            Some(run_app) => {
                let workdir = run_app_workdir(config, run_app)?;
                (
                    workdir,
                    plugin.run_app_command(&run_app.entry_file, meta.deps_installed),
                )
            }
            None => {
                let code = options.code.as_deref().ok_or_else(|| {
                    Error::Config("inline code missing".to_string())
                })?;
                self.containers
                    .write_workspace_file(&meta.container_id, plugin.inline_filename(), code)
                    .await?;
                (
                    WORKSPACE_MOUNT.to_string(),
                    plugin.inline_command(meta.deps_installed),
                )
            }
        };

        // Step 8: execute with live demultiplexed streaming
        self.sessions.update_container_state(&meta.container_id, true);
        meta.is_running = true;
        meta.last_executed_at = Some(chrono::Utc::now());

        let exec = self.containers.exec_capture(
            &meta.container_id,
            cmd,
            Some(&workdir),
            options.sinks.stdout.as_ref(),
            options.sinks.stderr.as_ref(),
        );
        let output = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, exec).await {
                Ok(result) => result?,
                Err(_) => {
                    // The runtime offers no exec-level kill; stop the container
                    if let Err(e) = self.containers.stop_container(&meta.container_name).await {
                        warn!(
                            "Failed to stop {} after timeout: {}",
                            meta.container_name, e
                        );
                    }
                    return Err(Error::Timeout(format!(
                        "execution exceeded {:?} on {}",
                        limit, meta.container_name
                    )));
                }
            },
            None => exec.await?,
        };
        self.sessions.update_container_state(&meta.container_id, false);

        Ok((dep_out, output))
    }

    /// Step 3: strategy-specific container acquisition
    async fn acquire_container(
        &self,
        session_id: &str,
        config: &SessionConfig,
        options: &ExecutionOptions,
        image: &str,
    ) -> Result<ContainerMeta> {
        match config.strategy {
            PlacementStrategy::PerExecution => {
                let handle = self
                    .containers
                    .create_container(image, &config.container, None)
                    .await?;
                let meta = self.register_handle(session_id, image, handle);
                Ok(meta)
            }

            PlacementStrategy::Pool => {
                if let Some(current) = self.sessions.current_container(session_id) {
                    if images_match(&current.image, image) {
                        self.containers.ensure_running(&current.container_name).await?;
                        return Ok(current);
                    }
                    // Image changed: detach the pooled container entirely
                    self.phase(&format!(
                        "Detaching pooled container {} on image change",
                        current.container_name
                    ));
                    self.sessions.deregister_container(&current.container_id);
                    self.containers.pool().remove(&current.container_name);
                    self.containers
                        .remove_container_and_dir(&handle_from(&current), true)
                        .await;
                }
                match self.containers.pool_acquire(image, &config.container).await? {
                    Some(handle) => Ok(self.register_handle(session_id, image, handle)),
                    None => Err(Error::Pool(format!(
                        "no pooled container available for image {}",
                        image
                    ))),
                }
            }

            PlacementStrategy::PerSession => {
                self.acquire_per_session(session_id, config, options, image)
                    .await
            }
        }
    }

    async fn acquire_per_session(
        &self,
        session_id: &str,
        config: &SessionConfig,
        options: &ExecutionOptions,
        image: &str,
    ) -> Result<ContainerMeta> {
        let shared = options.workspace_sharing == WorkspaceSharing::Shared;

        if let Some(current) = self.sessions.current_container(session_id) {
            if images_match(&current.image, image) {
                self.containers.ensure_running(&current.container_name).await?;
                return Ok(current);
            }

            if shared {
                // Park the current container; it may serve a later run
                if let Err(e) = self.containers.stop_container(&current.container_name).await {
                    warn!(
                        "Failed to stop retained container {}: {}",
                        current.container_name, e
                    );
                }
                self.sessions.retain_idle(session_id, &current.container_id);
                self.phase(&format!(
                    "Retained {} idle on image change",
                    current.container_name
                ));
            } else {
                self.sessions.deregister_container(&current.container_id);
                self.containers
                    .remove_container_and_dir(&handle_from(&current), true)
                    .await;
                self.phase(&format!(
                    "Replaced {} on image change",
                    current.container_name
                ));
            }
        }

        if shared {
            if let Some(retained) = self.sessions.take_idle_matching(session_id, image) {
                self.containers.ensure_running(&retained.container_name).await?;
                self.sessions
                    .set_current(session_id, Some(retained.container_id.clone()));
                self.phase(&format!(
                    "Restarted retained container {}",
                    retained.container_name
                ));
                return Ok(retained);
            }
        }

        // Shared mode pins every container of the session to one directory
        let workspace_dir = if shared {
            self.sessions.shared_workspace(session_id)
        } else {
            None
        };
        let handle = self
            .containers
            .create_container(image, &config.container, workspace_dir)
            .await?;
        if shared && self.sessions.shared_workspace(session_id).is_none() {
            self.sessions
                .set_shared_workspace(session_id, handle.workspace_dir.clone());
        }
        Ok(self.register_handle(session_id, image, handle))
    }

    fn register_handle(
        &self,
        session_id: &str,
        image: &str,
        handle: ContainerHandle,
    ) -> ContainerMeta {
        let meta = ContainerMeta::new(
            session_id,
            &handle.id,
            &handle.name,
            image,
            handle.workspace_dir,
        );
        self.sessions.register_container(meta.clone());
        meta
    }

    /// Tear down a session's containers
    ///
    /// Pool containers are released back to the warm pool; other strategies
    /// remove the container, keeping the workspace (pruned down to generated
    /// files) when asked. Idle-retained containers get the same treatment.
    pub async fn cleanup_session(&self, session_id: &str, keep_generated: bool) -> Result<()> {
        let config = self.sessions.config(session_id)?;

        let mut metas = Vec::new();
        if let Some(current) = self.sessions.current_container(session_id) {
            if config.strategy == PlacementStrategy::Pool {
                self.sessions.deregister_container(&current.container_id);
                if let Err(e) = self.containers.pool_release(&handle_from(&current)).await {
                    warn!(
                        "Failed to release {} to the pool: {}",
                        current.container_name, e
                    );
                }
            } else {
                metas.push(current);
            }
        }
        metas.extend(self.sessions.idle_retained(session_id));

        // Retained containers in shared mode can share one directory, so the
        // prune keeps the union of everything the session generated
        let kept: std::collections::HashSet<PathBuf> = metas
            .iter()
            .flat_map(|m| m.session_generated_files.iter().cloned())
            .collect();

        for meta in &metas {
            self.sessions.deregister_container(&meta.container_id);
            let handle = handle_from(meta);
            self.containers
                .remove_container_and_dir(&handle, !keep_generated)
                .await;
        }
        if keep_generated {
            let mut pruned = std::collections::HashSet::new();
            for meta in &metas {
                if pruned.insert(meta.workspace_dir.clone()) {
                    if let Err(e) = workspace::prune_except(&meta.workspace_dir, &kept) {
                        warn!(
                            "Failed to prune workspace {}: {}",
                            meta.workspace_dir.display(),
                            e
                        );
                    }
                }
            }
        }

        self.sessions.remove_session(session_id);
        self.phase(&format!("Cleaned up session {}", session_id));
        Ok(())
    }

    /// Tear down every session, then the container manager's global state
    pub async fn cleanup(&self, keep_generated: bool) -> Result<()> {
        for session_id in self.sessions.session_ids() {
            if let Err(e) = self.cleanup_session(&session_id, keep_generated).await {
                warn!("Cleanup of session {} failed: {}", session_id, e);
            }
        }
        if !keep_generated {
            self.containers.cleanup().await;
        }
        Ok(())
    }

    /// Derived view of a session
    pub fn session_info(&self, session_id: &str) -> Result<crate::types::SessionInfo> {
        self.sessions.session_info(session_id)
    }

    fn session_workspace(&self, session_id: &str) -> Result<(PathBuf, ContainerMeta)> {
        if !self.sessions.exists(session_id) {
            return Err(Error::Session(format!("unknown session {}", session_id)));
        }
        self.sessions
            .current_container(session_id)
            .map(|meta| (meta.workspace_dir.clone(), meta))
            .ok_or_else(|| {
                Error::Session(format!("session {} has no active container", session_id))
            })
    }

    /// List workspace files, optionally only those generated by the session
    pub fn list_workspace_files(
        &self,
        session_id: &str,
        only_generated: bool,
    ) -> Result<Vec<PathBuf>> {
        let (dir, meta) = self.session_workspace(session_id)?;
        if only_generated {
            Ok(sorted(&meta.session_generated_files))
        } else {
            Ok(sorted(&workspace::collect_files(&dir)?))
        }
    }

    /// Write base64 content to a workspace-relative path
    pub fn add_file_from_base64(
        &self,
        session_id: &str,
        rel_path: &str,
        b64: &str,
    ) -> Result<PathBuf> {
        let (dir, _) = self.session_workspace(session_id)?;
        workspace::add_file_from_base64(&dir, rel_path, b64)
    }

    /// Copy a local file into the workspace
    pub fn copy_file_into_workspace(
        &self,
        session_id: &str,
        local_path: &Path,
        dest_rel_path: &str,
    ) -> Result<PathBuf> {
        let (dir, _) = self.session_workspace(session_id)?;
        workspace::copy_into(&dir, local_path, dest_rel_path)
    }

    /// Read a workspace file base64-encoded
    pub fn read_file_base64(&self, session_id: &str, rel_path: &str) -> Result<String> {
        let (dir, _) = self.session_workspace(session_id)?;
        workspace::read_file_base64(&dir, rel_path)
    }

    /// Read a workspace file as raw bytes
    pub fn read_file_binary(&self, session_id: &str, rel_path: &str) -> Result<Vec<u8>> {
        let (dir, _) = self.session_workspace(session_id)?;
        workspace::read_file_binary(&dir, rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerMount;

    #[test]
    fn test_dependency_checksum_is_order_insensitive() {
        let a = dependency_checksum(&["requests".to_string(), "flask".to_string()]);
        let b = dependency_checksum(&["flask".to_string(), "requests".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_dependency_checksum_empty() {
        assert_eq!(dependency_checksum(&[]), "");
        assert_ne!(dependency_checksum(&["jq".to_string()]), "");
    }

    #[test]
    fn test_dependency_checksum_keys_on_tokens() {
        let pinned = dependency_checksum(&["flask==3.0".to_string()]);
        let bare = dependency_checksum(&["flask".to_string()]);
        assert_ne!(pinned, bare);
    }

    #[test]
    fn test_shared_sharing_rejected_off_per_session() {
        let options = ExecutionOptions::new("shell", "echo hi")
            .with_workspace_sharing(WorkspaceSharing::Shared);

        for strategy in [PlacementStrategy::Pool, PlacementStrategy::PerExecution] {
            let config = SessionConfig::new(strategy);
            let err = validate_options(&config, &options).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{} accepted shared", strategy);
        }

        let config = SessionConfig::new(PlacementStrategy::PerSession);
        assert!(validate_options(&config, &options).is_ok());
    }

    #[test]
    fn test_missing_run_target_rejected() {
        let config = SessionConfig::new(PlacementStrategy::PerSession);
        let options = ExecutionOptions {
            language: "python".to_string(),
            ..Default::default()
        };
        assert!(validate_options(&config, &options).is_err());
    }

    #[test]
    fn test_run_app_requires_matching_directory_mount() {
        let run_app = RunApp {
            entry_file: "server.js".to_string(),
            cwd: "/project".to_string(),
        };

        let config = SessionConfig::new(PlacementStrategy::PerSession);
        assert!(run_app_workdir(&config, &run_app).is_err());

        let config = SessionConfig::new(PlacementStrategy::PerSession)
            .with_mount(ContainerMount::directory("/tmp", "/project"));
        assert_eq!(run_app_workdir(&config, &run_app).unwrap(), "/project");

        // A file mount at the same target does not qualify
        let config = SessionConfig::new(PlacementStrategy::PerSession)
            .with_mount(ContainerMount::file("/tmp/x", "/project"));
        assert!(run_app_workdir(&config, &run_app).is_err());
    }

    // End-to-end scenarios; these drive a real Docker daemon.
    mod e2e {
        use super::*;
        use crate::types::StreamSinks;
        use std::sync::{Arc, Mutex};

        async fn engine() -> ExecutionEngine {
            ExecutionEngine::new().await.expect("docker daemon")
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_shell_happy_path() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerExecution))
                .unwrap();
            let result = engine
                .execute_code(&session, ExecutionOptions::new("shell", "echo hello"))
                .await
                .unwrap();

            assert_eq!(result.stdout, "hello\n");
            assert_eq!(result.stderr, "");
            assert_eq!(result.exit_code, 0);
            assert!(result.generated_files.is_empty());
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_dependency_cache_hit() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerSession))
                .unwrap();
            let options = || {
                ExecutionOptions::new("python", "import requests; print(requests.__name__)")
                    .with_dependencies(["requests"])
            };

            let first = engine.execute_code(&session, options()).await.unwrap();
            assert!(!first.dependency_stdout.is_empty());
            assert_eq!(first.exit_code, 0);

            let second = engine.execute_code(&session, options()).await.unwrap();
            assert_eq!(second.dependency_stdout, "");
            assert!(second.execution_time_ms < first.execution_time_ms);

            engine.cleanup_session(&session, false).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_generated_file_detection() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerSession))
                .unwrap();
            let result = engine
                .execute_code(
                    &session,
                    ExecutionOptions::new(
                        "python",
                        "open('report.txt', 'w').write('done')",
                    ),
                )
                .await
                .unwrap();

            assert_eq!(result.exit_code, 0);
            let report = result.workspace_dir.join("report.txt");
            assert!(result.generated_files.contains(&report));
            assert!(report.is_file());

            engine.cleanup_session(&session, false).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_shell_os_package_dependency() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerSession))
                .unwrap();
            let result = engine
                .execute_code(
                    &session,
                    ExecutionOptions::new("shell", "echo '{\"a\":1}' | jq .a")
                        .with_dependencies(["jq"]),
                )
                .await
                .unwrap();

            assert_eq!(result.stdout, "1\n");
            assert_eq!(result.exit_code, 0);
            assert!(result.dependency_stdout.contains("fetch"));

            engine.cleanup_session(&session, false).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_run_app_mode() {
            let engine = engine().await;
            let project = tempfile::tempdir().unwrap();
            std::fs::write(
                project.path().join("package.json"),
                r#"{"name":"proj","version":"1.0.0","dependencies":{"express":"*"}}"#,
            )
            .unwrap();
            std::fs::write(
                project.path().join("server.js"),
                "const express = require('express'); console.log(typeof express);",
            )
            .unwrap();

            let session = engine
                .create_session(
                    SessionConfig::new(PlacementStrategy::PerSession).with_mount(
                        ContainerMount::directory(project.path(), "/project"),
                    ),
                )
                .unwrap();
            let result = engine
                .execute_code(
                    &session,
                    ExecutionOptions::run_app("javascript", "server.js", "/project")
                        .with_dependencies(["express"]),
                )
                .await
                .unwrap();

            assert_eq!(result.exit_code, 0);
            assert_eq!(result.stdout, "function\n");
            assert!(!result.dependency_stdout.is_empty() || !result.dependency_stderr.is_empty());

            engine.cleanup_session(&session, false).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_image_mismatch_replaces_container() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerSession))
                .unwrap();

            engine
                .execute_code(&session, ExecutionOptions::new("python", "print('py')"))
                .await
                .unwrap();
            engine
                .execute_code(&session, ExecutionOptions::new("shell", "echo sh"))
                .await
                .unwrap();

            let info = engine.session_info(&session).unwrap();
            assert_eq!(info.container_count, 2);

            engine.cleanup_session(&session, false).await.unwrap();
        }

        #[tokio::test]
        #[ignore = "requires a local Docker daemon"]
        async fn test_streaming_sinks_receive_chunks() {
            let engine = engine().await;
            let session = engine
                .create_session(SessionConfig::new(PlacementStrategy::PerExecution))
                .unwrap();

            let collected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
            let inner = collected.clone();
            let mut options = ExecutionOptions::new("shell", "echo streamed");
            options.sinks = StreamSinks {
                stdout: Some(Arc::new(move |chunk: &[u8]| {
                    inner.lock().unwrap().extend_from_slice(chunk);
                })),
                ..Default::default()
            };

            let result = engine.execute_code(&session, options).await.unwrap();
            assert_eq!(result.stdout, "streamed\n");
            assert_eq!(String::from_utf8_lossy(&collected.lock().unwrap()), "streamed\n");
        }
    }
}
