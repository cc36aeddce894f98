//! On-disk store for message attachments.
//!
//! Each upload is written as `<uuid>` with a `<uuid>.json` sidecar holding
//! the descriptor handed back to the client and a BLAKE3 content hash.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::constants::UPLOAD_URL_PREFIX;
use parley_shared::{Attachment, AttachmentKind, UserId};

use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadMeta {
    owner: UserId,
    attachment: Attachment,
    blake3: String,
}

/// A stored upload ready to be served.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub mime_type: String,
    pub original_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    base_path: PathBuf,
    max_size: usize,
}

impl UploadStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::UpstreamUnavailable(format!(
                "failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Persist `data` uploaded by `owner` and describe it as an attachment.
    pub async fn store(
        &self,
        owner: UserId,
        original_name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<Attachment, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("empty upload".into()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let attachment = Attachment {
            kind: AttachmentKind::from_mime(mime_type),
            original_name: sanitize_name(original_name),
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            url: format!("{UPLOAD_URL_PREFIX}{id}"),
        };
        let meta = UploadMeta {
            owner,
            attachment: attachment.clone(),
            blake3: blake3::hash(data).to_hex().to_string(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| ServerError::UpstreamUnavailable(e.to_string()))?;

        fs::write(self.data_path(id), data)
            .await
            .map_err(|e| io_err("write", id, e))?;
        fs::write(self.meta_path(id), meta_json)
            .await
            .map_err(|e| io_err("write metadata for", id, e))?;

        debug!(id = %id, size = data.len(), kind = attachment.kind.as_str(), hash = %meta.blake3, "Stored upload");
        Ok(attachment)
    }

    pub async fn get(&self, id: Uuid) -> Result<StoredUpload, ServerError> {
        let meta = self.meta(id).await?;
        let data = fs::read(self.data_path(id))
            .await
            .map_err(|e| io_err("read", id, e))?;

        Ok(StoredUpload {
            mime_type: meta.attachment.mime_type,
            original_name: meta.attachment.original_name,
            data,
        })
    }

    /// Whether `attachment` is exactly the descriptor this store handed to
    /// `owner` when it accepted the upload.
    pub async fn accepts(&self, owner: UserId, attachment: &Attachment) -> bool {
        let Some(id) = attachment
            .url
            .strip_prefix(UPLOAD_URL_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            return false;
        };

        match self.meta(id).await {
            Ok(meta) => meta.owner == owner && meta.attachment == *attachment,
            Err(_) => false,
        }
    }

    async fn meta(&self, id: Uuid) -> Result<UploadMeta, ServerError> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::NotFound("Upload".into()));
            }
            Err(e) => return Err(io_err("read metadata for", id, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| ServerError::UpstreamUnavailable(e.to_string()))
    }

    fn data_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(id.to_string())
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{id}.json"))
    }
}

fn io_err(action: &str, id: Uuid, e: std::io::Error) -> ServerError {
    ServerError::UpstreamUnavailable(format!("failed to {action} upload {id}: {e}"))
}

/// Keep only the final path component of a client-supplied file name.
fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == ".." {
        "file".to_string()
    } else {
        base.to_string()
    }
}
