//! HTTP-proxied worker sandbox backend
//!
//! Delegates lifecycle and exec to a remote worker (Cloudflare-style) over a
//! small JSON protocol. The worker owns the actual runtime; this adapter only
//! speaks HTTP and never sees provider internals.

use crate::error::{EngineError, Result};
use crate::sandbox::{
    SandboxBackend, SandboxCommandOutput, SandboxCreateConfig, SandboxRuntimeInfo,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::RequestBuilder;
use serde_json::{json, Value};

pub struct HttpWorkerBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpWorkerBackend {
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::not_found("worker sandbox not found"));
        }
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(EngineError::backend(format!(
                "sandbox worker returned {status}: {body}"
            )));
        }
        Ok(body)
    }

    fn str_field(body: &Value, key: &str) -> Result<String> {
        body.get(key)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| EngineError::backend(format!("worker response missing '{key}'")))
    }
}

#[async_trait]
impl SandboxBackend for HttpWorkerBackend {
    fn kind(&self) -> &'static str {
        "cloudflare"
    }

    async fn start_sandbox(&self, config: &SandboxCreateConfig) -> Result<SandboxRuntimeInfo> {
        let body = self
            .send(
                self.client
                    .post(format!("{}/sandboxes", self.base_url))
                    .json(config),
            )
            .await?;
        Ok(SandboxRuntimeInfo {
            sandbox_id: Self::str_field(&body, "id")?,
            running: true,
            started_at: body
                .get("started_at")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn kill_sandbox(&self, backend_id: &str) -> Result<bool> {
        self.send(
            self.client
                .delete(format!("{}/sandboxes/{backend_id}", self.base_url)),
        )
        .await?;
        Ok(true)
    }

    async fn get_sandbox(&self, backend_id: &str) -> Result<SandboxRuntimeInfo> {
        let body = self
            .send(
                self.client
                    .get(format!("{}/sandboxes/{backend_id}", self.base_url)),
            )
            .await?;
        Ok(SandboxRuntimeInfo {
            sandbox_id: backend_id.to_string(),
            running: body.get("running").and_then(Value::as_bool).unwrap_or(false),
            started_at: body
                .get("started_at")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    async fn exec_command(&self, backend_id: &str, command: &str) -> Result<SandboxCommandOutput> {
        let body = self
            .send(
                self.client
                    .post(format!("{}/sandboxes/{backend_id}/exec", self.base_url))
                    .json(&json!({"command": command})),
            )
            .await?;
        Ok(SandboxCommandOutput {
            stdout: body
                .get("stdout")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            stderr: body
                .get("stderr")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            exit_code: body.get("exit_code").and_then(Value::as_i64).unwrap_or(-1),
        })
    }

    async fn write_file(&self, backend_id: &str, path: &str, bytes: &[u8]) -> Result<()> {
        self.send(
            self.client
                .put(format!("{}/sandboxes/{backend_id}/files", self.base_url))
                .json(&json!({
                    "path": path,
                    "content_b64": BASE64.encode(bytes),
                })),
        )
        .await?;
        Ok(())
    }

    async fn read_file(&self, backend_id: &str, path: &str) -> Result<Vec<u8>> {
        let body = self
            .send(
                self.client
                    .get(format!("{}/sandboxes/{backend_id}/files", self.base_url))
                    .query(&[("path", path)]),
            )
            .await?;
        let encoded = Self::str_field(&body, "content_b64")?;
        BASE64
            .decode(encoded)
            .map_err(|e| EngineError::backend(format!("worker file decode: {e}")))
    }
}
