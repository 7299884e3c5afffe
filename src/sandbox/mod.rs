//! Sandbox lifecycle broker
//!
//! Backend-agnostic create/exec/kill/upload/download over pluggable backends.
//! The broker is stateful in one respect only: it owns the `SandboxLog` row
//! per sandbox, translating between the engine UUID (the only identifier that
//! crosses the API boundary) and the backend's native id, and keeping the
//! exec history, generated-file list and keep-alive accounting current.

use crate::blob::BlobStore;
use crate::config::{CoreConfig, SandboxKind};
use crate::error::{EngineError, Result};
use crate::metrics::capture_increment;
use crate::storage::sandbox_log::{self, CommandEntry, SandboxLogRow};
use crate::types::{metric_tags, ProjectId, SandboxId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod docker;
pub mod http_worker;

/// Creation parameters for a new sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxCreateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Update parameters (keep-alive extension).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxUpdateConfig {
    pub keepalive_longer_by_seconds: i64,
}

/// Runtime information the broker returns. `sandbox_id` is always the engine
/// UUID by the time it leaves the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRuntimeInfo {
    pub sandbox_id: String,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// Output of one exec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxCommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// The fixed backend interface. Implementations adapt provider SDKs; all ids
/// here are backend-native.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend kind tag persisted on the SandboxLog row.
    fn kind(&self) -> &'static str;

    async fn start_sandbox(&self, config: &SandboxCreateConfig) -> Result<SandboxRuntimeInfo>;

    async fn kill_sandbox(&self, backend_id: &str) -> Result<bool>;

    async fn get_sandbox(&self, backend_id: &str) -> Result<SandboxRuntimeInfo>;

    async fn exec_command(&self, backend_id: &str, command: &str) -> Result<SandboxCommandOutput>;

    async fn write_file(&self, backend_id: &str, path: &str, bytes: &[u8]) -> Result<()>;

    async fn read_file(&self, backend_id: &str, path: &str) -> Result<Vec<u8>>;
}

/// The broker: backend registry + SandboxLog ownership.
pub struct SandboxBroker {
    pool: PgPool,
    blob: BlobStore,
    backends: HashMap<&'static str, Arc<dyn SandboxBackend>>,
    default_backend: Option<&'static str>,
    default_keepalive_seconds: i64,
}

impl SandboxBroker {
    /// Build the registry from configuration. Factories are registered
    /// explicitly at startup, never reflectively.
    pub fn new(config: &CoreConfig, pool: PgPool, blob: BlobStore) -> Result<Self> {
        let mut backends: HashMap<&'static str, Arc<dyn SandboxBackend>> = HashMap::new();
        let default_backend = match config.sandbox_backend {
            SandboxKind::Disabled => None,
            SandboxKind::Docker => {
                let backend = docker::DockerBackend::new(config.sandbox_docker_image.clone())?;
                let kind = backend.kind();
                backends.insert(kind, Arc::new(backend));
                Some(kind)
            }
            SandboxKind::Cloudflare => {
                let worker_url = config.cloudflare_worker_url.clone().ok_or_else(|| {
                    EngineError::bad_request("cloudflare_worker_url is required")
                })?;
                let backend = http_worker::HttpWorkerBackend::new(
                    worker_url,
                    config.cloudflare_worker_auth_token.clone(),
                );
                let kind = backend.kind();
                backends.insert(kind, Arc::new(backend));
                Some(kind)
            }
        };
        if let Some(kind) = default_backend {
            info!(backend = kind, "sandbox backend registered");
        }
        Ok(Self {
            pool,
            blob,
            backends,
            default_backend,
            default_keepalive_seconds: config.sandbox_default_keepalive_secs,
        })
    }

    fn backend(&self) -> Result<&Arc<dyn SandboxBackend>> {
        let kind = self
            .default_backend
            .ok_or_else(|| EngineError::backend("no sandbox backend configured"))?;
        self.backends
            .get(kind)
            .ok_or_else(|| EngineError::backend(format!("sandbox backend {kind} not registered")))
    }

    /// Recompute the keep-alive budget and emit the delta as a metric.
    async fn touch_alive_seconds(
        &self,
        sandbox_id: SandboxId,
        project_id: ProjectId,
        keepalive_seconds: i64,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let (old, new) =
            sandbox_log::recompute_alive_seconds(&mut conn, sandbox_id, keepalive_seconds).await?;
        let delta = new - old;
        if delta != 0 {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                if let Err(e) = capture_increment(
                    &pool,
                    project_id,
                    metric_tags::SANDBOX_ALIVE_SECONDS,
                    delta,
                )
                .await
                {
                    warn!(error = %e, "failed to capture sandbox keep-alive metric");
                }
            });
        }
        Ok(())
    }

    async fn resolve(&self, sandbox_id: SandboxId) -> Result<(String, ProjectId)> {
        let mut conn = self.pool.acquire().await?;
        let row = sandbox_log::fetch(&mut conn, sandbox_id).await?;
        let backend_id = row.backend_sandbox_id.clone().ok_or_else(|| {
            EngineError::not_found(format!("sandbox {sandbox_id} not found or was killed"))
        })?;
        Ok((backend_id, ProjectId::from(row.project_id)))
    }

    /// Create and start a sandbox; returns runtime info under the engine
    /// UUID.
    pub async fn create(
        &self,
        project_id: ProjectId,
        config: &SandboxCreateConfig,
    ) -> Result<SandboxRuntimeInfo> {
        let backend = self.backend()?;
        let mut info = backend.start_sandbox(config).await?;

        let mut conn = self.pool.acquire().await?;
        let row = sandbox_log::create(
            &mut conn,
            project_id,
            &info.sandbox_id,
            backend.kind(),
            self.default_keepalive_seconds,
        )
        .await?;
        debug!(
            engine_id = %row.sandbox_id(),
            backend = backend.kind(),
            backend_id = %info.sandbox_id,
            "created sandbox"
        );

        info.sandbox_id = row.sandbox_id().to_string();
        Ok(info)
    }

    /// Kill the sandbox. The log row survives with a nulled backend id and a
    /// keep-alive budget cut to elapsed time.
    pub async fn kill(&self, sandbox_id: SandboxId) -> Result<bool> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let backend = self.backend()?;
        let killed = backend.kill_sandbox(&backend_id).await?;

        let mut conn = self.pool.acquire().await?;
        sandbox_log::mark_killed(&mut conn, sandbox_id).await?;
        drop(conn);
        self.touch_alive_seconds(sandbox_id, project_id, 0).await?;
        info!(%sandbox_id, backend_id = %backend_id, "killed sandbox");
        Ok(killed)
    }

    pub async fn get(&self, sandbox_id: SandboxId) -> Result<SandboxRuntimeInfo> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let mut info = self.backend()?.get_sandbox(&backend_id).await?;
        self.touch_alive_seconds(sandbox_id, project_id, self.default_keepalive_seconds)
            .await?;
        info.sandbox_id = sandbox_id.to_string();
        Ok(info)
    }

    /// Extend the keep-alive budget.
    pub async fn update(
        &self,
        sandbox_id: SandboxId,
        config: &SandboxUpdateConfig,
    ) -> Result<SandboxRuntimeInfo> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let mut info = self.backend()?.get_sandbox(&backend_id).await?;
        self.touch_alive_seconds(sandbox_id, project_id, config.keepalive_longer_by_seconds)
            .await?;
        info.sandbox_id = sandbox_id.to_string();
        Ok(info)
    }

    /// Execute a command; the result is appended to the history.
    pub async fn exec(&self, sandbox_id: SandboxId, command: &str) -> Result<SandboxCommandOutput> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let output = self.backend()?.exec_command(&backend_id, command).await?;

        let mut conn = self.pool.acquire().await?;
        sandbox_log::append_command(
            &mut conn,
            sandbox_id,
            &CommandEntry {
                command: command.to_string(),
                exit_code: output.exit_code,
            },
        )
        .await?;
        drop(conn);
        self.touch_alive_seconds(sandbox_id, project_id, self.default_keepalive_seconds)
            .await?;
        Ok(output)
    }

    /// Copy a blob-store object into the sandbox filesystem.
    pub async fn upload_file(
        &self,
        sandbox_id: SandboxId,
        from_object_key: &str,
        to_sandbox_file: &str,
    ) -> Result<()> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let bytes = self.blob.download_object(from_object_key).await?;
        self.backend()?
            .write_file(&backend_id, to_sandbox_file, &bytes)
            .await?;
        self.touch_alive_seconds(sandbox_id, project_id, self.default_keepalive_seconds)
            .await?;
        Ok(())
    }

    /// Copy a sandbox file out to the blob store and record it as a
    /// generated file.
    pub async fn download_file(
        &self,
        sandbox_id: SandboxId,
        from_sandbox_file: &str,
        to_object_key: &str,
    ) -> Result<()> {
        let (backend_id, project_id) = self.resolve(sandbox_id).await?;
        let bytes = self
            .backend()?
            .read_file(&backend_id, from_sandbox_file)
            .await?;
        self.blob
            .upload_object(to_object_key, bytes, "application/octet-stream")
            .await?;

        let mut conn = self.pool.acquire().await?;
        sandbox_log::append_generated_file(&mut conn, sandbox_id, from_sandbox_file).await?;
        drop(conn);
        self.touch_alive_seconds(sandbox_id, project_id, self.default_keepalive_seconds)
            .await?;
        Ok(())
    }

    /// The full log row (with a fresh keep-alive recompute).
    pub async fn get_log(&self, sandbox_id: SandboxId) -> Result<SandboxLogRow> {
        let mut conn = self.pool.acquire().await?;
        let row = sandbox_log::fetch(&mut conn, sandbox_id).await?;
        if row.backend_sandbox_id.is_some() {
            drop(conn);
            self.touch_alive_seconds(
                sandbox_id,
                ProjectId::from(row.project_id),
                self.default_keepalive_seconds,
            )
            .await?;
            let mut conn = self.pool.acquire().await?;
            return sandbox_log::fetch(&mut conn, sandbox_id).await;
        }
        Ok(row)
    }

    /// All sandbox rows of a project.
    pub async fn list(&self, project_id: ProjectId) -> Result<Vec<SandboxLogRow>> {
        let mut conn = self.pool.acquire().await?;
        sandbox_log::list_for_project(&mut conn, project_id).await
    }
}
