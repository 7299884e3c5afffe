//! Docker sandbox backend
//!
//! One sandbox maps to one long-lived container. Exec runs through the Docker
//! exec API; file transfer rides over exec with base64 framing so the backend
//! needs no archive plumbing.

use crate::error::{EngineError, Result};
use crate::sandbox::{
    SandboxBackend, SandboxCommandOutput, SandboxCreateConfig, SandboxRuntimeInfo,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

pub struct DockerBackend {
    docker: Docker,
    image: String,
}

impl DockerBackend {
    pub fn new(image: String) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::backend(format!("docker connect: {e}")))?;
        Ok(Self { docker, image })
    }

    async fn run_exec(&self, container: &str, command: &str) -> Result<SandboxCommandOutput> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(vec!["sh", "-c", command]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::backend(format!("docker create_exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| EngineError::backend(format!("docker start_exec: {e}")))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(EngineError::backend(format!("docker exec stream: {e}")))
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EngineError::backend(format!("docker inspect_exec: {e}")))?;
        Ok(SandboxCommandOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn start_sandbox(&self, config: &SandboxCreateConfig) -> Result<SandboxRuntimeInfo> {
        let image = config.template.clone().unwrap_or_else(|| self.image.clone());
        let name = format!("lore-sandbox-{}", Uuid::new_v4().simple());
        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                Config {
                    image: Some(image.as_str()),
                    cmd: Some(vec!["sleep", "infinity"]),
                    env: Some(env.iter().map(String::as_str).collect()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::backend(format!("docker create_container: {e}")))?;
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::backend(format!("docker start_container: {e}")))?;

        debug!(container = %name, image = %image, "started sandbox container");
        Ok(SandboxRuntimeInfo {
            sandbox_id: name,
            running: true,
            started_at: None,
        })
    }

    async fn kill_sandbox(&self, backend_id: &str) -> Result<bool> {
        self.docker
            .remove_container(
                backend_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::backend(format!("docker remove_container: {e}")))?;
        Ok(true)
    }

    async fn get_sandbox(&self, backend_id: &str) -> Result<SandboxRuntimeInfo> {
        let inspect = self
            .docker
            .inspect_container(backend_id, None)
            .await
            .map_err(|e| EngineError::backend(format!("docker inspect_container: {e}")))?;
        let state = inspect.state.unwrap_or_default();
        Ok(SandboxRuntimeInfo {
            sandbox_id: backend_id.to_string(),
            running: state.running.unwrap_or(false),
            started_at: state.started_at,
        })
    }

    async fn exec_command(&self, backend_id: &str, command: &str) -> Result<SandboxCommandOutput> {
        self.run_exec(backend_id, command).await
    }

    async fn write_file(&self, backend_id: &str, path: &str, bytes: &[u8]) -> Result<()> {
        let encoded = BASE64.encode(bytes);
        let command = format!(
            "mkdir -p \"$(dirname '{path}')\" && echo '{encoded}' | base64 -d > '{path}'"
        );
        let output = self.run_exec(backend_id, &command).await?;
        if output.exit_code != 0 {
            return Err(EngineError::backend(format!(
                "write_file failed: {}",
                output.stderr
            )));
        }
        Ok(())
    }

    async fn read_file(&self, backend_id: &str, path: &str) -> Result<Vec<u8>> {
        let output = self
            .run_exec(backend_id, &format!("base64 '{path}'"))
            .await?;
        if output.exit_code != 0 {
            return Err(EngineError::not_found(format!(
                "sandbox file {path}: {}",
                output.stderr
            )));
        }
        let compact: String = output
            .stdout
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        BASE64
            .decode(compact)
            .map_err(|e| EngineError::backend(format!("read_file decode: {e}")))
    }
}
