//! S3 blob store wrapper
//!
//! Text-bearing artifact content is written to an S3-compatible store under
//! content-addressed keys: `disks/{project}/YYYY/MM/DD/{sha256}{ext}`.
//! Duplicate content deduplicates naturally by sha256 path, and writes are
//! idempotent so no mutual exclusion is needed.

use crate::config::CoreConfig;
use crate::error::{EngineError, Result};
use crate::types::ProjectId;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Extension → MIME mapping for text-ish formats; everything else defaults to
/// `text/plain`.
const EXT_MIME_MAP: &[(&str, &str)] = &[
    (".md", "text/markdown"),
    (".markdown", "text/markdown"),
    (".yaml", "text/yaml"),
    (".yml", "text/yaml"),
    (".csv", "text/csv"),
    (".json", "application/json"),
    (".xml", "application/xml"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".js", "text/javascript"),
    (".ts", "text/typescript"),
    (".go", "text/x-go"),
    (".py", "text/x-python"),
    (".rs", "text/x-rust"),
    (".rb", "text/x-ruby"),
    (".java", "text/x-java"),
    (".c", "text/x-c"),
    (".cpp", "text/x-c++"),
    (".h", "text/x-c"),
    (".hpp", "text/x-c++"),
    (".sh", "text/x-shellscript"),
    (".bash", "text/x-shellscript"),
    (".sql", "text/x-sql"),
    (".toml", "text/x-toml"),
    (".ini", "text/x-ini"),
    (".cfg", "text/x-ini"),
    (".conf", "text/x-ini"),
];

/// Lower-cased extension of a filename, including the dot; empty when none.
pub fn file_extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Detect MIME type from the filename extension.
pub fn detect_mime(filename: &str) -> &'static str {
    let ext = file_extension(filename);
    EXT_MIME_MAP
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("text/plain")
}

/// Whether content with this MIME type is searchable text.
pub fn is_textual_mime(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/json" || mime.starts_with("application/x-")
}

/// Content-addressed object key for a project's artifact bytes.
pub fn build_object_key(project_id: ProjectId, sha256_hex: &str, ext: &str) -> String {
    let date_prefix = Utc::now().format("%Y/%m/%d");
    format!("disks/{project_id}/{date_prefix}/{sha256_hex}{ext}")
}

/// Persisted description of an artifact's bytes. `content` is inline text for
/// text-bearing MIME types; binary artifacts carry the blob reference only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub bucket: String,
    pub s3_key: String,
    pub etag: String,
    pub sha256: String,
    pub mime: String,
    pub size_b: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// S3 client wrapper bound to the engine's asset bucket.
#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    bucket: String,
}

impl BlobStore {
    /// Build a client for the configured endpoint. Path-style addressing is
    /// required for MinIO-style deployments.
    pub fn new(config: &CoreConfig) -> Self {
        let credentials = Credentials::new(
            config.s3_access_key.clone(),
            config.s3_secret_key.clone(),
            None,
            None,
            "lore-static",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()))
            .endpoint_url(&config.s3_endpoint)
            .credentials_provider(credentials)
            .force_path_style(config.s3_use_path_style)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload raw bytes; returns the object ETag (quotes stripped).
    pub async fn upload_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| EngineError::backend(format!("s3 put {key}: {e}")))?;
        let etag = output
            .e_tag()
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        debug!(key, etag = %etag, "uploaded object");
        Ok(etag)
    }

    /// Fetch an object's bytes.
    pub async fn download_object(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| EngineError::backend(format!("s3 get {key}: {e}")))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| EngineError::backend(format!("s3 read {key}: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    /// Upload text content under its content address and build the asset
    /// metadata persisted with the artifact row.
    pub async fn upload_text_asset(
        &self,
        project_id: ProjectId,
        filename: &str,
        content: &str,
    ) -> Result<AssetMeta> {
        let bytes = content.as_bytes();
        let sha256_hex = hex::encode(Sha256::digest(bytes));
        let mime = detect_mime(filename);
        let key = build_object_key(project_id, &sha256_hex, &file_extension(filename));

        let etag = self.upload_object(&key, bytes.to_vec(), mime).await?;

        Ok(AssetMeta {
            bucket: self.bucket.clone(),
            s3_key: key,
            etag,
            sha256: sha256_hex,
            mime: mime.to_string(),
            size_b: bytes.len() as u64,
            content: Some(content.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("SKILL.md"), ".md");
        assert_eq!(file_extension("main.PY"), ".py");
        assert_eq!(file_extension("Makefile"), "");
        assert_eq!(file_extension(".gitignore"), "");
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime("SKILL.md"), "text/markdown");
        assert_eq!(detect_mime("data.json"), "application/json");
        assert_eq!(detect_mime("run.sh"), "text/x-shellscript");
        assert_eq!(detect_mime("unknown.bin"), "text/plain");
        assert_eq!(detect_mime("no-extension"), "text/plain");
    }

    #[test]
    fn test_textual_mime_filter() {
        assert!(is_textual_mime("text/markdown"));
        assert!(is_textual_mime("application/json"));
        assert!(is_textual_mime("application/x-python"));
        assert!(!is_textual_mime("image/png"));
        assert!(!is_textual_mime("application/pdf"));
    }

    #[test]
    fn test_object_key_layout() {
        let project = ProjectId::new();
        let key = build_object_key(project, "abc123", ".md");
        assert!(key.starts_with(&format!("disks/{project}/")));
        assert!(key.ends_with("abc123.md"));
        // disks/{project}/YYYY/MM/DD/{sha}{ext}
        assert_eq!(key.split('/').count(), 6);
    }

    #[test]
    fn test_asset_meta_serialization_skips_absent_content() {
        let meta = AssetMeta {
            bucket: "b".into(),
            s3_key: "k".into(),
            etag: "e".into(),
            sha256: "s".into(),
            mime: "image/png".into(),
            size_b: 3,
            content: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("content").is_none());
    }
}
