//! Remote package transfer
//!
//! Plugin packages travel as gzipped tar archives holding a top-level
//! `plugin/` directory plus a `plugin.plug` sidecar (zlib-compressed JSON
//! with the published numeric version and publisher identity). The hub
//! speaks HTTPS: a download endpoint, a version-check endpoint and a
//! two-step multipart upload.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::application::errors::TransportError;

/// Characters an identifier may never contain
const FORBIDDEN_ID_CHARS: [char; 6] = [' ', '/', '\\', '\'', '*', '&'];

/// Sidecar metadata written by the hub next to a downloaded package
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageInfo {
    pub id: String,
    pub numeric_version: u64,
    #[serde(default)]
    pub publisher: Option<i64>,
}

/// Version-check response for a published plugin
#[derive(Debug, Clone, Deserialize)]
pub struct PublishedPlugin {
    pub numeric_version: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Metadata sent ahead of a package upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub discord_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct UploadTicket {
    upload_to: String,
    #[serde(default)]
    error: Option<String>,
}

/// `true` when the identifier's character set is publishable.
pub fn valid_identifier(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| FORBIDDEN_ID_CHARS.contains(&c))
}

/// Directory-safe rendition of a plugin identifier.
pub fn sanitize_id(id: &str) -> String {
    id.replace(['.', '-'], "_")
}

/// Reject anything that is not a readable gzipped tar archive. Runs before
/// extraction so a bad download never touches the plugin root.
pub fn validate_archive(path: &Path) -> Result<(), TransportError> {
    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|_| TransportError::InvalidArchive(archive_error_message()))?;
    for entry in entries {
        entry.map_err(|_| TransportError::InvalidArchive(archive_error_message()))?;
    }
    Ok(())
}

fn archive_error_message() -> String {
    "There was an error downloading the plugin (was not a gzipped tar archive)".to_string()
}

/// Extract a validated archive into the plugin root and move its contents
/// into place under the sanitized identifier. Caller holds the download
/// lock.
pub fn unpack_archive(
    archive_path: &Path,
    plugin_root: &Path,
    plugin_id: &str,
) -> Result<PathBuf, TransportError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(plugin_root)
        .map_err(|_| TransportError::InvalidArchive(archive_error_message()))?;

    let staged = plugin_root.join("plugin");
    let target = plugin_root.join(sanitize_id(plugin_id));
    std::fs::rename(&staged, &target)?;

    let staged_sidecar = plugin_root.join("plugin.plug");
    if staged_sidecar.exists() {
        std::fs::rename(&staged_sidecar, plugin_root.join(format!("{}.plug", plugin_id)))?;
    }

    std::fs::remove_file(archive_path)?;
    Ok(target)
}

/// Package a plugin directory as `plugin/` inside a gzipped tar archive.
pub fn pack_plugin(plugin_dir: &Path, tmp_dir: &Path, plugin_id: &str) -> Result<PathBuf, TransportError> {
    let archive_path = tmp_dir.join(format!("{}.tar.gz", plugin_id));
    let file = std::fs::File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("plugin", plugin_dir)?;
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())?
        .sync_all()?;
    Ok(archive_path)
}

/// Decode a `.plug` sidecar. Best-effort: any failure reads as "not hub
/// metadata".
pub fn read_package_info(path: &Path) -> Option<PackageInfo> {
    let raw = std::fs::read(path).ok()?;
    let mut decoder = ZlibDecoder::new(raw.as_slice());
    let mut decoded = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut decoded).ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Encode a `.plug` sidecar.
pub fn write_package_info(path: &Path, info: &PackageInfo) -> Result<(), TransportError> {
    let json = serde_json::to_vec(info)
        .map_err(|e| TransportError::Rejected(format!("unserializable package info: {}", e)))?;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    std::fs::write(path, encoder.finish()?)?;
    Ok(())
}

/// HTTPS client for the plugin hub
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetch a plugin archive into `tmp_dir`, streaming the body to disk.
    pub async fn download(&self, plugin_id: &str, tmp_dir: &Path) -> Result<PathBuf, TransportError> {
        tracing::debug!("requesting download for plugin {}", plugin_id);
        let mut response = self
            .http
            .get(self.endpoint("api/v2/plugins/download"))
            .query(&[("plugin_id", plugin_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 400 {
                tracing::debug!("aborted plugin download ({}): not found", plugin_id);
                return Err(TransportError::Rejected(
                    "The requested plugin was not found".to_string(),
                ));
            }
            tracing::debug!("aborted plugin download ({}): status {}", plugin_id, status);
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: "An unknown error occurred".to_string(),
            });
        }

        let archive_path = tmp_dir.join(format!("{}.tar.gz", plugin_id));
        let mut file = std::fs::File::create(&archive_path)?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)?;
        }
        Ok(archive_path)
    }

    /// Ask the hub for the published version of a plugin.
    pub async fn published(&self, plugin_id: &str) -> Result<PublishedPlugin, TransportError> {
        let response = self
            .http
            .get(self.endpoint("api/v2/plugins"))
            .query(&[("id", plugin_id)])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 {
            let body: PublishedPlugin = response.json().await?;
            return Err(TransportError::Rejected(
                body.error.unwrap_or_else(|| "Unknown plugin".to_string()),
            ));
        }
        if !status.is_success() {
            return Err(TransportError::Rejected(
                "The hub is unavailable, please try again later".to_string(),
            ));
        }

        Ok(response.json().await?)
    }

    /// Two-step upload: POST the metadata, then multipart-post the archive
    /// to the returned location.
    pub async fn publish(&self, request: &UploadRequest, archive: &Path) -> Result<(), TransportError> {
        let mut post = self.http.post(self.endpoint("api/v2/plugins")).json(request);
        if let Some(token) = &self.token {
            post = post.header("Authorization", token);
        }
        let response = post.send().await?;

        let status = response.status();
        let ticket: UploadTicket = response.json().await.map_err(TransportError::Http)?;
        if !status.is_success() {
            let reason = ticket.error.unwrap_or_else(|| format!("status {}", status));
            tracing::debug!("aborted upload due to hub rejection: {}", reason);
            return Err(TransportError::Rejected(reason));
        }

        tracing::debug!("received a request to upload file to {}", ticket.upload_to);
        let bytes = std::fs::read(archive)?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(
            archive
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "plugin.tar.gz".to_string()),
        );
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(&ticket.upload_to)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("aborted file upload due to hub rejection: {} ({})", body, status);
            return Err(TransportError::Rejected(body));
        }

        Ok(())
    }
}
