//! Artifact stager (C6): writes a per-job descriptor to object storage and
//! requests a presigned GET URL.
//!
//! The `ObjectStore` trait is grounded on `ob-workflow::blob_store::BlobStore`
//! (from the `adamtc007-ob-poc` example pack), which defines the same
//! store/fetch/presign shape; adapted here to this spec's
//! `putDescriptor`/`presignGet`/`healthCheck` contract (spec §6.1). The
//! teacher's own `rcommerce-core::media::file_upload::FileUploadService`
//! stubs its S3 calls entirely (`Err(Error::storage("S3 upload not yet
//! implemented"))`), so the real `aws-sdk-s3` presigning call is written
//! fresh here rather than adapted from that file, while still using the
//! crate the teacher's own workspace already depends on for this purpose.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::job::JobRecord;

#[derive(Debug, Clone)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub transient: bool,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Capability the engine requires from object storage (spec §6.1).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_descriptor(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, StoreError>;
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Result of a successful stage: what the worker writes into
/// `JobRecord::result`.
pub struct StagedArtifact {
    pub url: String,
    pub checksum: String,
    pub size: u64,
    pub url_expires_at: chrono::DateTime<Utc>,
}

/// Composes the object key, writes the descriptor, and requests a presigned
/// URL. Malformed job input (empty `file_ids`) is classified permanent;
/// storage-layer failures retain the `ObjectStore`'s transient/permanent
/// classification, per spec §4.6.
pub async fn stage(
    store: &dyn ObjectStore,
    job: &JobRecord,
    url_ttl: Duration,
) -> Result<StagedArtifact, StoreError> {
    if job.file_ids.is_empty() {
        return Err(StoreError::permanent("job has no file_ids to stage"));
    }

    let key = object_key(job)?;
    let descriptor = descriptor_bytes(job);
    let checksum = sha256_hex(&descriptor);
    let size = descriptor.len() as u64;

    store.put_descriptor(&key, &descriptor).await?;
    let presigned = store.presign_get(&key, url_ttl).await?;

    Ok(StagedArtifact {
        url: presigned.url,
        checksum,
        size,
        url_expires_at: presigned.expires_at,
    })
}

/// `{userId}/{jobId}/artifact.json`, with both segments sanitized against
/// path traversal (spec §4.6: "namespaced by userId and jobId, no path
/// traversal").
fn object_key(job: &JobRecord) -> Result<String, StoreError> {
    let user_segment = job.user_id.as_deref().unwrap_or("_anonymous");
    let sanitized_user = sanitize_segment(user_segment)?;
    Ok(format!("{}/{}/artifact.json", sanitized_user, job.job_id))
}

fn sanitize_segment(segment: &str) -> Result<String, StoreError> {
    if segment.is_empty() || segment.contains("..") || segment.contains('/') || segment.contains('\\') {
        return Err(StoreError::permanent(format!(
            "invalid object key segment: {}",
            segment
        )));
    }
    Ok(segment.to_string())
}

fn descriptor_bytes(job: &JobRecord) -> Vec<u8> {
    serde_json::json!({
        "jobId": job.job_id,
        "fileIds": job.file_ids,
        "createdAt": job.created_at,
    })
    .to_string()
    .into_bytes()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Local, credential-free backend: writes descriptors under a directory and
/// fabricates `file://` URLs. Adapted from
/// `ob-workflow::blob_store::LocalBlobStore`'s use of `tokio::fs` and
/// `file://` URI refs; this is the default backend so the service runs
/// without AWS credentials.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_descriptor(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::transient(format!("mkdir failed: {}", e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::transient(format!("write failed: {}", e)))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, StoreError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(StoreError::permanent("descriptor missing for presign"));
        }
        Ok(PresignedUrl {
            url: format!("file://{}", path.display()),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::transient(format!("storage root unreachable: {}", e)))
    }
}

/// Real object storage backend via `aws-sdk-s3`. The teacher's workspace
/// already depends on `aws-sdk-s3`/`aws-config`/`aws-credential-types` (see
/// `rcommerce-core/Cargo.toml`) though no checked-in module exercised them;
/// this is that crate's intended use.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(bucket: impl Into<String>, endpoint: Option<String>, region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_descriptor(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(bytes.to_vec().into())
            .send()
            .await
            .map_err(|e| StoreError::transient(format!("s3 put_object failed: {}", e)))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, StoreError> {
        let presign_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(ttl)
            .map_err(|e| StoreError::permanent(format!("invalid presign ttl: {}", e)))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StoreError::transient(format!("s3 presign failed: {}", e)))?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StoreError::transient(format!("s3 head_bucket failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::JobId;
    use crate::engine::job::Priority;

    fn sample_job() -> JobRecord {
        JobRecord::new(
            JobId::new_v4(),
            vec![70_000],
            None,
            Some("u1".into()),
            Priority::Standard,
            3,
            Utc::now(),
            chrono::Duration::hours(1),
        )
    }

    #[test]
    fn object_key_is_namespaced_and_traversal_free() {
        let job = sample_job();
        let key = object_key(&job).unwrap();
        assert!(key.starts_with("u1/"));
        assert!(key.ends_with("artifact.json"));
    }

    #[test]
    fn object_key_rejects_traversal_in_user_id() {
        let mut job = sample_job();
        job.user_id = Some("../../etc".into());
        assert!(object_key(&job).is_err());
    }

    #[tokio::test]
    async fn stage_rejects_empty_file_ids_as_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let mut job = sample_job();
        job.file_ids.clear();
        let err = stage(&store, &job, Duration::from_secs(60)).await.unwrap_err();
        assert!(!err.transient);
    }

    #[tokio::test]
    async fn stage_succeeds_against_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let job = sample_job();
        let artifact = stage(&store, &job, Duration::from_secs(60)).await.unwrap();
        assert!(artifact.url.starts_with("file://"));
        assert!(artifact.size > 0);
        assert_eq!(artifact.checksum.len(), 64); // sha256 hex digest
    }

    #[tokio::test]
    async fn local_store_health_check_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let store = LocalObjectStore::new(&nested);
        store.health_check().await.unwrap();
        assert!(nested.exists());
    }
}
