use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PublishError, Result};
use crate::naming::RepoId;
use crate::upload::{commit_payload, lfs_batch_request, UploadFile};

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: String,
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
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub commit_url: String,
    pub commit_oid: String,
}

/// Blocking client for the model hub's REST and git-LFS endpoints.
pub struct HubClient {
    endpoint: String,
    token: String,
    http: Client,
}

impl HubClient {
    pub fn new(endpoint: &str, token: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("legalft/", env!("CARGO_PKG_VERSION")))
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self { endpoint: endpoint.trim_end_matches('/').to_string(), token, http })
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }

    /// Name of the account the token belongs to.
    pub fn whoami(&self) -> Result<String> {
        let url = format!("{}/api/whoami-v2", self.endpoint);
        let resp = check(self.authed(self.http.get(&url)).send()?, &url)?;
        let me: WhoAmI = resp.json()?;
        Ok(me.name)
    }

    /// Create a model repository. An existing repo is not an error.
    pub fn create_repo(&self, repo: &RepoId, private: bool) -> Result<()> {
        let url = format!("{}/api/repos/create", self.endpoint);
        let body = json!({ "type": "model", "name": repo.name, "organization": repo.namespace, "private": private });
        let resp = self.authed(self.http.post(&url)).json(&body).send()?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            info!(%repo, "Repository already exists");
            return Ok(());
        }
        check(resp, &url)?;
        info!(%repo, private, "Created repository");
        Ok(())
    }

    /// Push file contents to LFS storage. Objects the hub already has are skipped.
    pub fn upload_lfs(&self, repo: &RepoId, files: &[UploadFile]) -> Result<()> {
        let url = format!("{}/{}.git/info/lfs/objects/batch", self.endpoint, repo);
        let resp = self
            .authed(self.http.post(&url))
            .header(ACCEPT, LFS_CONTENT_TYPE)
            .header(CONTENT_TYPE, LFS_CONTENT_TYPE)
            .body(lfs_batch_request(files).to_string())
            .send()?;
        let batch: LfsBatchResponse = check(resp, &url)?.json()?;

        for object in batch.objects {
            let Some(file) = files.iter().find(|f| f.oid == object.oid) else { continue };
            if let Some(err) = object.error {
                return Err(PublishError::Status { url: url.clone(), status: err.code, body: err.message });
            }
            let Some(actions) = object.actions else {
                debug!(path = %file.path_in_repo, "Already stored");
                continue;
            };
            if let Some(upload) = actions.upload {
                self.put_object(file, &upload)?;
            }
            if let Some(verify) = actions.verify {
                let mut req = self.authed(self.http.post(&verify.href)).json(&json!({ "oid": file.oid, "size": file.size }));
                for (k, v) in &verify.header {
                    req = req.header(k.as_str(), v.as_str());
                }
                check(req.send()?, &verify.href)?;
            }
        }
        Ok(())
    }

    fn put_object(&self, file: &UploadFile, action: &LfsAction) -> Result<()> {
        if action.header.contains_key("chunk_size") {
            return Err(PublishError::Unsupported {
                path: file.path_in_repo.clone(),
                reason: "hub requested a multipart upload".into(),
            });
        }
        info!(path = %file.path_in_repo, bytes = file.size, "Uploading");
        let handle = File::open(&file.local_path)
            .map_err(|source| PublishError::Io { path: file.local_path.clone(), source })?;
        let mut req = self.http.put(&action.href).body(Body::sized(handle, file.size));
        for (k, v) in &action.header {
            req = req.header(k.as_str(), v.as_str());
        }
        check(req.send()?, &action.href)?;
        Ok(())
    }

    /// Commit already-uploaded LFS objects to `main`.
    pub fn commit(&self, repo: &RepoId, summary: &str, files: &[UploadFile]) -> Result<CommitInfo> {
        let url = format!("{}/api/models/{}/commit/main", self.endpoint, repo);
        let resp = self
            .authed(self.http.post(&url))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(commit_payload(summary, "", files))
            .send()?;
        Ok(check(resp, &url)?.json()?)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder { req.bearer_auth(&self.token) }
}

fn check(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() { return Ok(resp); }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(PublishError::Unauthorized { url: url.to_string(), status: status.as_u16() });
    }
    let body = resp.text().unwrap_or_default();
    Err(PublishError::Status { url: url.to_string(), status: status.as_u16(), body })
}
