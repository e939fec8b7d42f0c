//! Publishing a saved model directory to the Hugging Face model hub.
//!
//! The flow is login (`whoami`), repo creation, LFS upload of every file,
//! then a single commit on `main`. Uses the blocking `reqwest` client.

pub mod client;
pub mod error;
pub mod naming;
pub mod upload;

use std::path::Path;
use tracing::info;

use legalft_core::config::HubSettings;

pub use client::{CommitInfo, HubClient};
pub use error::{PublishError, Result};
pub use naming::RepoId;
pub use upload::{collect_files, UploadFile};

/// Read the access token from the environment at call time.
pub fn resolve_token(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(PublishError::MissingToken(env_name.to_string())),
    }
}

pub struct Publisher {
    settings: HubSettings,
}

impl Publisher {
    pub fn new(settings: HubSettings) -> Self { Self { settings } }

    pub fn settings(&self) -> &HubSettings { &self.settings }

    /// Upload everything under `dir` to a freshly named repo.
    pub fn publish(&self, dir: &Path) -> Result<RepoId> {
        let token = resolve_token(&self.settings.token_env)?;
        let files = collect_files(dir)?;
        let client = HubClient::new(&self.settings.endpoint, token)?;

        let user = client.whoami()?;
        info!(user = %user, endpoint = client.endpoint(), "Logged in");
        let namespace = if self.settings.namespace.is_empty() { user.as_str() } else { self.settings.namespace.as_str() };
        let repo = RepoId::unique(namespace, &self.settings.repo_prefix);

        client.create_repo(&repo, self.settings.private)?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        info!(%repo, files = files.len(), bytes = total, "Uploading model");
        client.upload_lfs(&repo, &files)?;
        let commit = client.commit(&repo, "Upload fine-tuned model", &files)?;
        info!(%repo, commit = %commit.commit_oid, url = %commit.commit_url, "Published");
        Ok(repo)
    }
}
