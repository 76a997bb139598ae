//! Remote publisher: uploads a job's artifacts into a per-job folder of a
//! remote artifact store.

use crate::executor::{CommandSpec, Executor};
use async_trait::async_trait;
use repolens_common::hash::sha256_file;
use repolens_common::{Error, Result};
use repolens_schema::{FailureKind, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use crate::narrative::SYNAPSE_BASE_URL;

/// Folder-addressed remote store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Id of the child folder `name` under `parent_id`, if it exists.
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    /// Store one file. Re-uploading the same name into the same folder replaces it.
    async fn upload_file(&self, folder_id: &str, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub name: String,
    pub sha256: String,
}

/// What a successful publish left in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub folder_id: String,
    pub files: Vec<PublishedFile>,
}

/// Resolve (or create) the folder named `repo_name` under `parent_id`.
pub async fn resolve_folder(store: &dyn ArtifactStore, parent_id: &str, repo_name: &str) -> Result<String> {
    if let Some(id) = store.find_folder(parent_id, repo_name).await? {
        debug!("Reusing folder {} for {}", id, repo_name);
        return Ok(id);
    }
    let id = store.create_folder(parent_id, repo_name).await?;
    info!("Created folder {} for {}", id, repo_name);
    Ok(id)
}

/// Upload the existing files among `files` to the job's folder.
pub async fn publish(
    store: &dyn ArtifactStore,
    parent_id: &str,
    repo_name: &str,
    files: &[PathBuf],
) -> StageResult<PublishReceipt> {
    let present: Vec<&PathBuf> = files.iter().filter(|p| p.is_file()).collect();
    if present.is_empty() {
        return StageResult::failure(
            FailureKind::UpstreamUnavailable,
            format!("no artifacts to publish for {}", repo_name),
        );
    }

    let folder_id = match resolve_folder(store, parent_id, repo_name).await {
        Ok(id) => id,
        Err(e) => return StageResult::from(Err::<PublishReceipt, _>(e)),
    };

    let mut published = Vec::with_capacity(present.len());
    for path in present {
        let sha256 = match sha256_file(path) {
            Ok(h) => h,
            Err(e) => return StageResult::failure(FailureKind::Tool, format!("{}: {}", path.display(), e)),
        };
        if let Err(e) = store.upload_file(&folder_id, path).await {
            return StageResult::from(Err::<PublishReceipt, _>(e));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        debug!("Uploaded {} ({})", name, sha256);
        published.push(PublishedFile { name, sha256 });
    }

    info!("Published {} files for {} to {}", published.len(), repo_name, folder_id);
    StageResult::success(PublishReceipt {
        folder_id,
        files: published,
    })
}

/// Synapse store: folder management over REST, uploads through the
/// `synapse` command-line client.
pub struct SynapseStore {
    client: reqwest::Client,
    auth_token: String,
    base_url: String,
    executor: Arc<dyn Executor>,
    upload_timeout: Duration,
}

impl SynapseStore {
    pub fn new(auth_token: impl Into<String>, executor: Arc<dyn Executor>, upload_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_token: auth_token.into(),
            base_url: SYNAPSE_BASE_URL.to_string(),
            executor,
            upload_timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn entity_id(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{}: {}", status, body.trim())));
        }
        let body: Value = response.json().await.map_err(|e| Error::Http(e.to_string()))?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse("entity response without id".to_string()))
    }
}

#[async_trait]
impl ArtifactStore for SynapseStore {
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let response = self
            .post("/entity/child", &json!({"parentId": parent_id, "entityName": name}))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::entity_id(response).await.map(Some)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let response = self
            .post(
                "/entity",
                &json!({
                    "concreteType": "org.sagebionetworks.repo.model.Folder",
                    "name": name,
                    "parentId": parent_id,
                }),
            )
            .await?;
        Self::entity_id(response).await
    }

    async fn upload_file(&self, folder_id: &str, path: &Path) -> Result<()> {
        let command = CommandSpec::new("synapse")
            .args(["store", "--parentid", folder_id])
            .arg(path.to_string_lossy())
            .env("SYNAPSE_AUTH_TOKEN", self.auth_token.as_str())
            .timeout(self.upload_timeout);

        let output = self.executor.execute(&command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::CommandExecution {
                cmd: command.display(),
                reason: output.stderr.trim().to_string(),
            })
        }
    }
}
