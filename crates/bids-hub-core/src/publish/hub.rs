//! HTTP client for a Hub-style dataset registry
//!
//! A commit first asks the registry which files must go through LFS
//! (`preupload`). Those are pushed to the LFS batch endpoint and referenced
//! by SHA-256 oid; the rest travel inline. The commit itself is an NDJSON
//! document: one `header` line, then one `file` or `lfsFile` line per
//! artifact. Listings walk the repo tree, following `Link: rel="next"`.

use super::config::HubConfig;
use super::registry::{DatasetManifest, Destination, RemoteRegistry, UploadReport, UploadRequest};
use crate::error::TransportError;
use async_trait::async_trait;
use base64::Engine;
use bids_hub_common::checksum::compute_checksum;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, ETAG, LINK};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Endpoints
// ============================================================================

/// Timeout for listing and repo management calls; commits use the
/// per-request timeout from the publisher
pub const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 60;

/// Bytes of each file sent to `preupload` so the registry can pick a mode
const PREUPLOAD_SAMPLE_BYTES: usize = 512;

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";

fn commit_url(endpoint: &str, repo_type: &str, dest: &Destination) -> String {
    format!(
        "{}/api/{}s/{}/commit/{}",
        endpoint, repo_type, dest.repo_id, dest.revision
    )
}

fn preupload_url(endpoint: &str, repo_type: &str, dest: &Destination) -> String {
    format!(
        "{}/api/{}s/{}/preupload/{}",
        endpoint, repo_type, dest.repo_id, dest.revision
    )
}

/// Model repos live at the root; other repo types under `<type>s/`
fn lfs_batch_url(endpoint: &str, repo_type: &str, dest: &Destination) -> String {
    let prefix = if repo_type == "model" {
        String::new()
    } else {
        format!("{}s/", repo_type)
    };
    format!(
        "{}/{}{}.git/info/lfs/objects/batch",
        endpoint, prefix, dest.repo_id
    )
}

fn tree_url(endpoint: &str, repo_type: &str, dest: &Destination, path: &str) -> String {
    format!(
        "{}/api/{}s/{}/tree/{}/{}?recursive=true",
        endpoint, repo_type, dest.repo_id, dest.revision, path
    )
}

fn create_repo_url(endpoint: &str) -> String {
    format!("{}/api/repos/create", endpoint)
}

/// Target of the `rel="next"` entry of a `Link` header, if any
fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|entry| {
            let mut parts = entry.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|param| {
                let param = param.trim();
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        })
}

fn header_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadEntry {
    path: String,
    upload_mode: UploadMode,
    #[serde(default)]
    should_ignore: bool,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadEntry>,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: Map<String, Json>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: i64,
    message: String,
}

pub struct HubClient {
    client: Client,
    config: HubConfig,
}

impl HubClient {
    pub fn new(config: HubConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("bids-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, TransportError> {
        Self::new(HubConfig::from_env())
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Attach the per-action headers an LFS batch response hands out
    fn with_action_headers(builder: RequestBuilder, action: &LfsAction) -> RequestBuilder {
        action
            .header
            .iter()
            .filter_map(|(name, value)| header_text(value).map(|v| (name, v)))
            .fold(builder, |b, (name, value)| b.header(name.as_str(), value))
    }

    async fn check(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn map_send_error(e: reqwest::Error, timeout: Duration) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            TransportError::Http(e)
        }
    }

    /// Create the dataset repository; an existing one is fine
    pub async fn ensure_repo(&self, destination: &Destination) -> Result<(), TransportError> {
        let (organization, name) = match destination.repo_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, destination.repo_id.as_str()),
        };
        let body = json!({
            "type": self.config.repo_type,
            "name": name,
            "organization": organization,
            "private": self.config.private,
        });

        let timeout = Duration::from_secs(DEFAULT_CONTROL_TIMEOUT_SECS);
        let response = self
            .authorized(self.client.post(create_repo_url(&self.config.endpoint)))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            debug!("Repository {} already exists", destination.repo_id);
            return Ok(());
        }
        Self::check(response).await?;
        info!("Created repository {}", destination.repo_id);
        Ok(())
    }

    /// Ask the registry how each file must be uploaded
    async fn preupload(
        &self,
        destination: &Destination,
        files: &[(String, Vec<u8>)],
    ) -> Result<HashMap<String, PreuploadEntry>, TransportError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let entries: Vec<Json> = files
            .iter()
            .map(|(path, bytes)| {
                let sample = &bytes[..bytes.len().min(PREUPLOAD_SAMPLE_BYTES)];
                json!({ "path": path, "sample": engine.encode(sample), "size": bytes.len() })
            })
            .collect();

        let timeout = Duration::from_secs(DEFAULT_CONTROL_TIMEOUT_SECS);
        let url = preupload_url(&self.config.endpoint, &self.config.repo_type, destination);
        let response = self
            .authorized(self.client.post(&url))
            .timeout(timeout)
            .json(&json!({ "files": entries }))
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;
        let modes: PreuploadResponse = Self::check(response).await?.json().await?;

        Ok(modes
            .files
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect())
    }

    /// Push one object through the LFS batch API unless the registry already has it
    async fn upload_lfs(
        &self,
        destination: &Destination,
        path: &str,
        oid: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let request = json!({
            "operation": "upload",
            "transfers": ["basic", "multipart"],
            "objects": [{ "oid": oid, "size": bytes.len() }],
            "hash_algo": "sha256",
            "ref": { "name": destination.revision },
        });

        let control = Duration::from_secs(DEFAULT_CONTROL_TIMEOUT_SECS);
        let url = lfs_batch_url(&self.config.endpoint, &self.config.repo_type, destination);
        let response = self
            .authorized(self.client.post(&url))
            .timeout(control)
            .header(ACCEPT, LFS_CONTENT_TYPE)
            .header(CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(request.to_string())
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, control))?;
        let batch: LfsBatchResponse = Self::check(response).await?.json().await?;

        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == oid)
            .ok_or_else(|| {
                TransportError::Rejected(format!("LFS batch response omits {}", path))
            })?;
        if let Some(error) = object.error {
            return Err(TransportError::Rejected(format!(
                "LFS refused {}: {} ({})",
                path, error.message, error.code
            )));
        }
        let Some(actions) = object.actions else {
            debug!("LFS object for {} already stored", path);
            return Ok(());
        };

        if let Some(upload) = actions.upload {
            if upload.header.contains_key("chunk_size") {
                self.upload_multipart(&upload, oid, bytes, timeout).await?;
            } else {
                let response = Self::with_action_headers(self.client.put(&upload.href), &upload)
                    .timeout(timeout)
                    .body(bytes.to_vec())
                    .send()
                    .await
                    .map_err(|e| Self::map_send_error(e, timeout))?;
                Self::check(response).await?;
            }
            debug!("Uploaded {} bytes of {} to LFS", bytes.len(), path);
        }

        if let Some(verify) = actions.verify {
            let builder = Self::with_action_headers(self.authorized(self.client.post(&verify.href)), &verify);
            let response = builder
                .timeout(control)
                .json(&json!({ "oid": oid, "size": bytes.len() }))
                .send()
                .await
                .map_err(|e| Self::map_send_error(e, control))?;
            Self::check(response).await?;
        }
        Ok(())
    }

    /// Multipart transfer: the action header carries `chunk_size` and one
    /// presigned URL per numbered part
    async fn upload_multipart(
        &self,
        upload: &LfsAction,
        oid: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let chunk_size = upload
            .header
            .get("chunk_size")
            .and_then(header_text)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| TransportError::Rejected("invalid LFS chunk_size".to_string()))?;

        let mut parts: Vec<(u32, String)> = upload
            .header
            .iter()
            .filter_map(|(key, value)| Some((key.parse::<u32>().ok()?, header_text(value)?)))
            .collect();
        parts.sort_by_key(|(number, _)| *number);

        let chunk_count = bytes.len().div_ceil(chunk_size);
        if parts.len() != chunk_count {
            return Err(TransportError::Rejected(format!(
                "LFS offered {} part URLs for {} chunks",
                parts.len(),
                chunk_count
            )));
        }

        let mut completed = Vec::with_capacity(parts.len());
        for ((number, url), chunk) in parts.iter().zip(bytes.chunks(chunk_size)) {
            let response = self
                .client
                .put(url)
                .timeout(timeout)
                .body(chunk.to_vec())
                .send()
                .await
                .map_err(|e| Self::map_send_error(e, timeout))?;
            let response = Self::check(response).await?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    TransportError::Rejected(format!("LFS part {} returned no ETag", number))
                })?;
            completed.push(json!({ "partNumber": number, "etag": etag }));
        }

        let response = self
            .client
            .post(&upload.href)
            .timeout(timeout)
            .header(ACCEPT, LFS_CONTENT_TYPE)
            .header(CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(json!({ "oid": oid, "parts": completed }).to_string())
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn commit(
        &self,
        destination: &Destination,
        message: &str,
        files: Vec<(String, Vec<u8>)>,
        timeout: Duration,
    ) -> Result<UploadReport, TransportError> {
        let modes = self.preupload(destination, &files).await?;

        let engine = base64::engine::general_purpose::STANDARD;
        let mut body = String::new();
        let header = json!({
            "key": "header",
            "value": { "summary": message, "description": "" },
        });
        body.push_str(&header.to_string());
        body.push('\n');

        let mut paths = Vec::with_capacity(files.len());
        let mut lfs_files = 0;
        for (path, bytes) in files {
            let mode = modes.get(&path);
            if mode.is_some_and(|m| m.should_ignore) {
                warn!("Registry ignores {}; it will not be committed", path);
                continue;
            }
            let line = match mode.map(|m| m.upload_mode) {
                Some(UploadMode::Lfs) => {
                    let oid = compute_checksum(&bytes);
                    self.upload_lfs(destination, &path, &oid, &bytes, timeout)
                        .await?;
                    lfs_files += 1;
                    json!({
                        "key": "lfsFile",
                        "value": { "path": path, "algo": "sha256", "oid": oid, "size": bytes.len() },
                    })
                },
                _ => json!({
                    "key": "file",
                    "value": {
                        "path": path,
                        "content": engine.encode(&bytes),
                        "encoding": "base64",
                    },
                }),
            };
            body.push_str(&line.to_string());
            body.push('\n');
            paths.push(path);
        }

        let url = commit_url(&self.config.endpoint, &self.config.repo_type, destination);
        debug!(
            "POST {} ({} files, {} via LFS, {} bytes)",
            url,
            paths.len(),
            lfs_files,
            body.len()
        );

        let response = self
            .authorized(self.client.post(&url))
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout))?;
        let response = Self::check(response).await?;

        let commit: CommitResponse = response.json().await?;
        Ok(UploadReport {
            commit_id: commit.commit_oid,
            files: paths,
        })
    }
}

#[async_trait]
impl RemoteRegistry for HubClient {
    async fn bulk_upload(&self, request: &UploadRequest) -> Result<UploadReport, TransportError> {
        let mut files = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let bytes = tokio::fs::read(&file.local_path).await?;
            files.push((file.path_in_repo.clone(), bytes));
        }
        self.commit(
            &request.destination,
            &request.commit_message,
            files,
            request.timeout,
        )
        .await
    }

    async fn list_remote_files(
        &self,
        destination: &Destination,
    ) -> Result<BTreeSet<String>, TransportError> {
        let timeout = Duration::from_secs(DEFAULT_CONTROL_TIMEOUT_SECS);
        let mut url = tree_url(
            &self.config.endpoint,
            &self.config.repo_type,
            destination,
            crate::staging::DATA_DIR,
        );
        let mut listing = BTreeSet::new();
        let mut pages = 0;

        loop {
            let response = self
                .authorized(self.client.get(&url))
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| Self::map_send_error(e, timeout))?;

            // a fresh repo has no data directory yet
            if pages == 0 && response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(listing);
            }
            let response = Self::check(response).await?;
            let next = next_page(response.headers());
            let entries: Vec<TreeEntry> = response.json().await?;
            listing.extend(
                entries
                    .into_iter()
                    .filter(|e| e.kind == "file")
                    .map(|e| e.path),
            );
            pages += 1;

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!("Listed {} remote files over {} pages", listing.len(), pages);
        Ok(listing)
    }

    async fn create_or_update_manifest(
        &self,
        destination: &Destination,
        manifest: &DatasetManifest,
    ) -> Result<(), TransportError> {
        let card = manifest.render_card();
        self.commit(
            destination,
            &format!("Update dataset card ({} rows)", manifest.row_count),
            vec![("README.md".to_string(), card.into_bytes())],
            Duration::from_secs(DEFAULT_CONTROL_TIMEOUT_SECS),
        )
        .await?;
        Ok(())
    }

    fn listing_hint(&self, destination: &Destination) -> String {
        format!(
            "curl -s -H \"Authorization: Bearer $HF_TOKEN\" '{}' | jq '[.[] | select(.type == \"file\")] | length'",
            tree_url(
                &self.config.endpoint,
                &self.config.repo_type,
                destination,
                crate::staging::DATA_DIR
            )
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::publish::registry::UploadFile;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HubClient {
        HubClient::new(
            HubConfig::default()
                .with_endpoint(server.uri())
                .with_token("hf_test"),
        )
        .unwrap()
    }

    async fn mount_preupload(server: &MockServer, path_in_repo: &str, mode: &str) {
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/preupload/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "path": path_in_repo, "uploadMode": mode, "shouldIgnore": false }]
            })))
            .mount(server)
            .await;
    }

    fn shard_request(dir: &TempDir, bytes: &[u8]) -> UploadRequest {
        let local = dir.path().join("shard.jsonl");
        std::fs::write(&local, bytes).unwrap();
        UploadRequest {
            destination: Destination::new("lab/arc"),
            files: vec![UploadFile {
                local_path: local,
                path_in_repo: "data/train-00000-of-00001.jsonl".to_string(),
                size: bytes.len() as u64,
            }],
            commit_message: "Upload shard 0".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_bulk_upload_posts_ndjson_commit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/commit/main"))
            .and(header("authorization", "Bearer hf_test"))
            .and(header("content-type", "application/x-ndjson"))
            .and(body_string_contains("\"path\":\"data/train-00000-of-00001.jsonl\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "commitOid": "abc123" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_preupload(&server, "data/train-00000-of-00001.jsonl", "regular").await;

        let dir = TempDir::new().unwrap();
        let request = shard_request(&dir, b"{\"subject_id\":\"M2001\"}\n");

        let report = client(&server).bulk_upload(&request).await.unwrap();
        assert_eq!(report.commit_id.as_deref(), Some("abc123"));
        assert_eq!(report.files, vec!["data/train-00000-of-00001.jsonl"]);
    }

    #[tokio::test]
    async fn test_bulk_upload_maps_status_errors() {
        let server = MockServer::start().await;
        mount_preupload(&server, "data/x.jsonl", "regular").await;
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/commit/main"))
            .respond_with(ResponseTemplate::new(504).set_body_string("gateway timeout"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let local = dir.path().join("shard.jsonl");
        std::fs::write(&local, b"{}\n").unwrap();
        let request = UploadRequest {
            destination: Destination::new("lab/arc"),
            files: vec![UploadFile {
                local_path: local,
                path_in_repo: "data/x.jsonl".to_string(),
                size: 3,
            }],
            commit_message: "Upload".to_string(),
            timeout: Duration::from_secs(5),
        };

        let err = client(&server).bulk_upload(&request).await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 504);
                assert_eq!(body, "gateway timeout");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_remote_files_keeps_files_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/datasets/lab/arc/tree/main/data"))
            .and(query_param("recursive", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "type": "directory", "path": "data" },
                { "type": "file", "path": "data/train-00000-of-00002.jsonl", "size": 10 },
                { "type": "file", "path": "data/train-00001-of-00002.jsonl", "size": 10 },
            ])))
            .mount(&server)
            .await;

        let listing = client(&server)
            .list_remote_files(&Destination::new("lab/arc"))
            .await
            .unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.contains("data/train-00001-of-00002.jsonl"));
    }

    #[tokio::test]
    async fn test_list_follows_next_links() {
        let server = MockServer::start().await;
        let next = format!(
            "<{}/api/datasets/lab/arc/tree/main/data?recursive=true&cursor=page2>; rel=\"next\"",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/api/datasets/lab/arc/tree/main/data"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "type": "file", "path": "data/train-00001-of-00002.jsonl" },
            ])))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/datasets/lab/arc/tree/main/data"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("link", next.as_str())
                    .set_body_json(json!([
                        { "type": "file", "path": "data/train-00000-of-00002.jsonl" },
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let listing = client(&server)
            .list_remote_files(&Destination::new("lab/arc"))
            .await
            .unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.contains("data/train-00000-of-00002.jsonl"));
        assert!(listing.contains("data/train-00001-of-00002.jsonl"));
    }

    #[test]
    fn test_next_page_parses_link_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            "<https://hub/a?cursor=1>; rel=\"prev\", <https://hub/a?cursor=3>; rel=\"next\""
                .parse()
                .unwrap(),
        );
        assert_eq!(next_page(&headers).as_deref(), Some("https://hub/a?cursor=3"));

        headers.insert(LINK, "<https://hub/a?cursor=1>; rel=\"prev\"".parse().unwrap());
        assert_eq!(next_page(&headers), None);
        assert_eq!(next_page(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_lfs_files_are_uploaded_then_referenced_by_oid() {
        let server = MockServer::start().await;
        let bytes = b"{\"t1w\":{\"bytes\":\"H4sI\"}}\n";
        let oid = compute_checksum(bytes);
        mount_preupload(&server, "data/train-00000-of-00001.jsonl", "lfs").await;

        Mock::given(method("POST"))
            .and(path("/datasets/lab/arc.git/info/lfs/objects/batch"))
            .and(header("accept", LFS_CONTENT_TYPE))
            .and(body_string_contains(oid.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{
                    "oid": oid,
                    "size": bytes.len(),
                    "actions": {
                        "upload": { "href": format!("{}/lfs/upload", server.uri()) },
                        "verify": { "href": format!("{}/lfs/verify", server.uri()) },
                    },
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/lfs/upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/lfs/verify"))
            .and(body_string_contains(oid.as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/commit/main"))
            .and(body_string_contains("\"key\":\"lfsFile\""))
            .and(body_string_contains(oid.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commitOid": "def456" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let report = client(&server)
            .bulk_upload(&shard_request(&dir, bytes))
            .await
            .unwrap();
        assert_eq!(report.commit_id.as_deref(), Some("def456"));
    }

    #[tokio::test]
    async fn test_lfs_multipart_completes_with_etags() {
        let server = MockServer::start().await;
        let bytes = b"0123456789";
        let oid = compute_checksum(bytes);
        mount_preupload(&server, "data/train-00000-of-00001.jsonl", "lfs").await;

        Mock::given(method("POST"))
            .and(path("/datasets/lab/arc.git/info/lfs/objects/batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{
                    "oid": oid,
                    "size": bytes.len(),
                    "actions": {
                        "upload": {
                            "href": format!("{}/lfs/complete", server.uri()),
                            "header": {
                                "chunk_size": "6",
                                "1": format!("{}/part/1", server.uri()),
                                "2": format!("{}/part/2", server.uri()),
                            },
                        },
                    },
                }]
            })))
            .mount(&server)
            .await;
        for part in ["1", "2"] {
            Mock::given(method("PUT"))
                .and(path(format!("/part/{}", part)))
                .respond_with(ResponseTemplate::new(200).insert_header("etag", format!("etag-{}", part).as_str()))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/lfs/complete"))
            .and(body_string_contains("\"etag\":\"etag-2\""))
            .and(body_string_contains("\"partNumber\":2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/commit/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commitOid": "789" })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        client(&server)
            .bulk_upload(&shard_request(&dir, bytes))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stored_lfs_object_skips_transfer() {
        let server = MockServer::start().await;
        let bytes = b"already there";
        let oid = compute_checksum(bytes);
        mount_preupload(&server, "data/train-00000-of-00001.jsonl", "lfs").await;
        Mock::given(method("POST"))
            .and(path("/datasets/lab/arc.git/info/lfs/objects/batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [{ "oid": oid, "size": bytes.len() }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/datasets/lab/arc/commit/main"))
            .and(body_string_contains("lfsFile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commitOid": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        client(&server)
            .bulk_upload(&shard_request(&dir, bytes))
            .await
            .unwrap();
    }

    #[test]
    fn test_lfs_batch_url_per_repo_type() {
        let dest = Destination::new("lab/arc");
        assert_eq!(
            lfs_batch_url("https://hub", "dataset", &dest),
            "https://hub/datasets/lab/arc.git/info/lfs/objects/batch"
        );
        assert_eq!(
            lfs_batch_url("https://hub", "model", &dest),
            "https://hub/lab/arc.git/info/lfs/objects/batch"
        );
    }

    #[tokio::test]
    async fn test_list_missing_tree_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let listing = client(&server)
            .list_remote_files(&Destination::new("lab/new"))
            .await
            .unwrap();
        assert!(listing.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_repo_accepts_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/repos/create"))
            .and(body_string_contains("\"organization\":\"lab\""))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .ensure_repo(&Destination::new("lab/arc"))
            .await
            .unwrap();
    }

    #[test]
    fn test_listing_hint_names_tree_endpoint() {
        let hub = HubClient::new(HubConfig::default()).unwrap();
        let hint = hub.listing_hint(&Destination::new("lab/arc"));
        assert!(hint.contains("https://huggingface.co/api/datasets/lab/arc/tree/main/data?recursive=true"));
    }
}
