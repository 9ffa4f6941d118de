//! Container manager over the Docker daemon
//!
//! Wraps the bollard client: image pulls, container provisioning with the
//! fixed security and resource profile, exec with stream demultiplexing,
//! workspace cleanup between reuses, the warm pool, and the final sweep of
//! orphaned managed containers.

mod pool;

pub use pool::{Pool, PoolConfig};

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UpdateContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{ContainerConfig, ContainerMount, ExecOutput, MountKind, OutputSink};
use crate::workspace;

/// Name prefix identifying containers this orchestrator manages
pub const CONTAINER_NAME_PREFIX: &str = "rb_";

/// In-container workspace mount point
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Default memory cap applied at creation
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

/// Default fractional CPU cap applied at creation
pub const DEFAULT_CPU_LIMIT: f64 = 0.5;
const CPU_PERIOD_MICROS: i64 = 100_000;
const STOP_TIMEOUT_SECS: i64 = 5;

/// A live container plus the host directory bound at `/workspace`
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Runtime container id
    pub id: String,
    /// Generated (`rb_` prefixed) container name
    pub name: String,
    /// Image the container was created from
    pub image: String,
    /// Host workspace directory
    pub workspace_dir: PathBuf,
}

/// Compare image references by repository and tag, ignoring the registry
pub fn images_match(a: &str, b: &str) -> bool {
    normalize_image(a) == normalize_image(b)
}

fn normalize_image(image: &str) -> String {
    let mut rest = image;
    if let Some((first, tail)) = image.split_once('/') {
        // A dot, port, or "localhost" marks the first segment as a registry
        if first.contains('.') || first.contains(':') || first == "localhost" {
            rest = tail;
        }
    }
    let tagged = rest
        .rsplit('/')
        .next()
        .map(|last| last.contains(':'))
        .unwrap_or(false);
    if tagged {
        rest.to_string()
    } else {
        format!("{}:latest", rest)
    }
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Manages containers, their workspaces, and the warm pool
pub struct ContainerManager {
    docker: Docker,
    pool: Pool,
    tracked: Mutex<HashMap<String, ContainerHandle>>,
}

impl ContainerManager {
    /// Connect to the local Docker daemon and verify it answers
    pub async fn new(pool_config: PoolConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!("Container manager connected to Docker");

        Ok(ContainerManager {
            docker,
            pool: Pool::new(pool_config),
            tracked: Mutex::new(HashMap::new()),
        })
    }

    /// The warm pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Ensure an image is present locally, pulling it if missing
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let images = self
            .docker
            .list_images::<String>(None)
            .await
            .map_err(|e| Error::Container(format!("Failed to list images: {}", e)))?;

        let present = images.iter().any(|img| {
            img.repo_tags
                .iter()
                .any(|tag| images_match(tag, image))
        });
        if present {
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(update) => {
                    if let Some(status) = update.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::Container(format!(
                        "Failed to pull image {}: {}",
                        image, e
                    )));
                }
            }
        }
        info!("Image pulled: {}", image);
        Ok(())
    }

    /// Create and start a container with the default profile
    ///
    /// `workspace_dir` reuses an existing host directory (shared-workspace
    /// sessions); otherwise a fresh one is created from the container name.
    pub async fn create_container(
        &self,
        image: &str,
        config: &ContainerConfig,
        workspace_dir: Option<PathBuf>,
    ) -> Result<ContainerHandle> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{}{}", CONTAINER_NAME_PREFIX, uuid::Uuid::new_v4()));
        let workspace_dir = match workspace_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                dir
            }
            None => workspace::create_for(&name)?,
        };

        self.ensure_image(image).await?;

        let mut binds = vec![format!("{}:{}", workspace_dir.display(), WORKSPACE_MOUNT)];
        binds.extend(self.prepare_mounts(&config.mounts)?);

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let memory = config
            .memory_limit
            .as_deref()
            .and_then(crate::types::parse_memory_limit)
            .unwrap_or(DEFAULT_MEMORY_BYTES);
        let cpu = config.cpu_limit.unwrap_or(DEFAULT_CPU_LIMIT);

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: Some(env),
            tty: Some(true),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            host_config: Some(HostConfig {
                binds: Some(binds),
                memory: Some(memory),
                memory_swap: Some(memory),
                cpu_period: Some(CPU_PERIOD_MICROS),
                cpu_quota: Some((cpu * CPU_PERIOD_MICROS as f64) as i64),
                network_mode: Some("bridge".to_string()),
                security_opt: Some(vec!["no-new-privileges:true".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        let handle = ContainerHandle {
            id: created.id,
            name: name.clone(),
            image: image.to_string(),
            workspace_dir,
        };

        if let Err(e) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            // Partial container; tear it down before surfacing the failure
            self.force_remove(&handle.name).await;
            workspace::remove_dir(&handle.workspace_dir);
            return Err(Error::Container(format!(
                "Failed to start container: {}",
                e
            )));
        }

        debug!("Created container {} ({})", name, image);
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), handle.clone());
        Ok(handle)
    }

    fn prepare_mounts(&self, mounts: &[ContainerMount]) -> Result<Vec<String>> {
        let mut binds = Vec::new();
        for mount in mounts {
            match mount.kind {
                MountKind::File => {
                    if !mount.source.is_file() {
                        return Err(Error::Config(format!(
                            "mount source {} is not a file",
                            mount.source.display()
                        )));
                    }
                    binds.push(format!(
                        "{}:{}:ro",
                        mount.source.display(),
                        mount.target
                    ));
                }
                MountKind::Directory => {
                    if !mount.source.is_dir() {
                        return Err(Error::Config(format!(
                            "mount source {} is not a directory",
                            mount.source.display()
                        )));
                    }
                    binds.push(format!("{}:{}", mount.source.display(), mount.target));
                }
                MountKind::Zip => {
                    let scratch = workspace::scratch_dir("zip")?;
                    workspace::extract_zip(&mount.source, &scratch)?;
                    binds.push(format!("{}:{}", scratch.display(), mount.target));
                }
            }
        }
        Ok(binds)
    }

    /// Start the container if it is not currently running
    pub async fn ensure_running(&self, container_name: &str) -> Result<()> {
        let inspect = self
            .docker
            .inspect_container(container_name, None)
            .await?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            self.docker
                .start_container(container_name, None::<StartContainerOptions<String>>)
                .await?;
        }
        Ok(())
    }

    /// Stop a container (per-session shared-workspace retention)
    pub async fn stop_container(&self, container_name: &str) -> Result<()> {
        self.docker
            .stop_container(
                container_name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await?;
        Ok(())
    }

    /// Run a command in the container and capture demultiplexed output
    ///
    /// Chunks are forwarded to the sinks in emission order as they arrive.
    /// The exit code falls back to 1 when the runtime does not report one.
    pub async fn exec_capture(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        working_dir: Option<&str>,
        stdout_sink: Option<&Arc<dyn OutputSink>>,
        stderr_sink: Option<&Arc<dyn OutputSink>>,
    ) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions::<String> {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd),
                    working_dir: working_dir.map(str::to_string),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Container(format!("Failed to create exec: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::Container(format!("Failed to start exec: {}", e)))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } => {
                        if let Some(sink) = stdout_sink {
                            sink.write(&message);
                        }
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        if let Some(sink) = stderr_sink {
                            sink.write(&message);
                        }
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(1);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Write a workspace file through the container
    ///
    /// A here-document exec rather than a host-side write: pooled containers
    /// had their workspace cleaned through an exec and must see the file
    /// immediately.
    pub async fn write_workspace_file(
        &self,
        container_id: &str,
        filename: &str,
        content: &str,
    ) -> Result<()> {
        let script = format!(
            "cat > {}/{} <<'RUNBOX_EOF'\n{}\nRUNBOX_EOF",
            WORKSPACE_MOUNT, filename, content
        );
        let output = self
            .exec_capture(
                container_id,
                vec!["sh".to_string(), "-c".to_string(), script],
                None,
                None,
                None,
            )
            .await?;
        if !output.success() {
            return Err(Error::Container(format!(
                "Failed to write {} into workspace: {}",
                filename, output.stderr
            )));
        }
        Ok(())
    }

    /// Empty `/workspace` inside the container, verifying the exec succeeded
    pub async fn clean_workspace(&self, container_id: &str) -> Result<()> {
        let output = self
            .exec_capture(
                container_id,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("rm -rf {}/*", WORKSPACE_MOUNT),
                ],
                None,
                None,
                None,
            )
            .await?;
        if !output.success() {
            return Err(Error::Container(format!(
                "Workspace cleanup exited {}: {}",
                output.exit_code, output.stderr
            )));
        }
        Ok(())
    }

    /// Update live memory/CPU caps on a container
    ///
    /// Memory is set with swap disabled; a fractional CPU value maps to a
    /// quota against a 100ms period.
    pub async fn update_resources(
        &self,
        container_name: &str,
        memory_bytes: i64,
        cpu_limit: f64,
    ) -> Result<()> {
        self.docker
            .update_container(
                container_name,
                UpdateContainerOptions::<String> {
                    memory: Some(memory_bytes),
                    memory_swap: Some(memory_bytes),
                    cpu_period: Some(CPU_PERIOD_MICROS),
                    cpu_quota: Some((cpu_limit * CPU_PERIOD_MICROS as f64) as i64),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Force-remove a container and optionally delete its host workspace
    pub async fn remove_container_and_dir(&self, handle: &ContainerHandle, delete_dir: bool) {
        self.force_remove(&handle.name).await;
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.name);
        if delete_dir {
            workspace::remove_dir(&handle.workspace_dir);
        }
    }

    async fn force_remove(&self, container_name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_name, Some(options)).await {
            Ok(()) => debug!("Removed container {}", container_name),
            Err(e) if is_not_found(&e) => {}
            Err(e) => warn!("Failed to remove container {}: {}", container_name, e),
        }
    }

    /// Borrow a warm container for `image`, or create one if the pool has room
    ///
    /// The entry is claimed inside the pool lock before any container I/O, so
    /// racing callers can never borrow the same freed entry. A container whose
    /// workspace cannot be cleaned is dropped from the pool and removed.
    pub async fn pool_acquire(
        &self,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerHandle>> {
        if let Some(handle) = self.pool.claim_matching(image) {
            self.ensure_running(&handle.name).await?;
            match self.clean_workspace(&handle.id).await {
                Ok(()) => {
                    debug!("Acquired pooled container {}", handle.name);
                    return Ok(Some(handle));
                }
                Err(e) => {
                    warn!(
                        "Evicting pooled container {} after cleanup failure: {}",
                        handle.name, e
                    );
                    self.pool.remove(&handle.name);
                    self.remove_container_and_dir(&handle, true).await;
                    return Ok(None);
                }
            }
        }

        if self.pool.has_room() {
            let mut config = config.clone();
            config.name = None;
            let handle = self.create_container(image, &config, None).await?;
            self.pool.insert_in_use(handle.clone());
            return Ok(Some(handle));
        }

        Ok(None)
    }

    /// Return a container to the pool and run pool maintenance
    pub async fn pool_release(&self, handle: &ContainerHandle) -> Result<()> {
        match self.clean_workspace(&handle.id).await {
            Ok(()) => self.pool.release(&handle.name),
            Err(e) => {
                warn!(
                    "Dropping container {} from pool, release cleanup failed: {}",
                    handle.name, e
                );
                self.pool.remove(&handle.name);
                self.remove_container_and_dir(handle, true).await;
            }
        }

        for expired in self.pool.take_idle_expired() {
            debug!("Evicting idle pooled container {}", expired.name);
            self.remove_container_and_dir(&expired, true).await;
        }

        while self.pool.deficit() > 0 {
            match self
                .create_container(&handle.image, &ContainerConfig::default(), None)
                .await
            {
                Ok(fresh) => self.pool.insert_idle(fresh),
                Err(e) => {
                    warn!("Pool top-up failed: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Remove every tracked container, then sweep orphans by name prefix
    ///
    /// The sweep recovers containers left behind by a crashed process: any
    /// non-running container carrying the orchestrator prefix is removed
    /// together with its host workspace directory.
    pub async fn cleanup(&self) {
        let tracked: Vec<ContainerHandle> = {
            let mut map = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, handle)| handle).collect()
        };
        for handle in tracked {
            self.force_remove(&handle.name).await;
            workspace::remove_dir(&handle.workspace_dir);
        }
        self.pool.drain();

        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "name".to_string(),
                vec![CONTAINER_NAME_PREFIX.to_string()],
            )]),
            ..Default::default()
        };
        let listed = match self.docker.list_containers(Some(options)).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!("Orphan sweep listing failed: {}", e);
                return;
            }
        };
        for summary in listed {
            let name = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|n| n.trim_start_matches('/').to_string());
            let running = summary.state.as_deref() == Some("running");
            if let Some(name) = name {
                if !running && name.starts_with(CONTAINER_NAME_PREFIX) {
                    info!("Sweeping orphaned container {}", name);
                    self.force_remove(&name).await;
                    if let Ok(dir) = workspace::dir_for(&name) {
                        workspace::remove_dir(&dir);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_image() {
        assert_eq!(normalize_image("alpine"), "alpine:latest");
        assert_eq!(normalize_image("node:18-alpine"), "node:18-alpine");
        assert_eq!(
            normalize_image("docker.io/library/python:3.9-slim"),
            "library/python:3.9-slim"
        );
        assert_eq!(
            normalize_image("localhost:5000/myimage:dev"),
            "myimage:dev"
        );
    }

    #[test]
    fn test_images_match_ignores_registry() {
        assert!(images_match("alpine", "alpine:latest"));
        assert!(images_match("docker.io/node:18-alpine", "node:18-alpine"));
        assert!(!images_match("node:18-alpine", "node:20-alpine"));
        assert!(!images_match("python:3.9-slim", "alpine:latest"));
    }
}
