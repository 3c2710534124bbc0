//! Blob store seam for software module artifacts.
//!
//! The orchestration core only ever reads artifact content and hashes when
//! assembling deployment payloads; storage backends (filesystem, S3, ...)
//! live behind [`ArtifactStore`]. Hashes are computed once at upload time
//! and served verbatim afterwards.

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::{DistributionSet, SoftwareModule};

/// Digests recorded for an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHashes {
    pub sha1: String,
    pub md5: String,
    pub sha256: String,
}

/// Read access to stored artifact blobs.
pub trait ArtifactStore: Send + Sync {
    fn input_stream(&self, artifact_id: i64) -> Result<Box<dyn Read + Send>, CoreError>;
    fn hashes(&self, artifact_id: i64) -> Result<ArtifactHashes, CoreError>;
}

/// In-memory artifact store for tests and demo mode.
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<i64, (Vec<u8>, ArtifactHashes)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, artifact_id: i64, content: Vec<u8>, hashes: ArtifactHashes) {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(artifact_id, (content, hashes));
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn input_stream(&self, artifact_id: i64) -> Result<Box<dyn Read + Send>, CoreError> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let (content, _) = blobs
            .get(&artifact_id)
            .ok_or_else(|| CoreError::not_found("artifact", artifact_id))?;
        Ok(Box::new(Cursor::new(content.clone())))
    }

    fn hashes(&self, artifact_id: i64) -> Result<ArtifactHashes, CoreError> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        blobs
            .get(&artifact_id)
            .map(|(_, h)| h.clone())
            .ok_or_else(|| CoreError::not_found("artifact", artifact_id))
    }
}

/// One artifact entry in a deployment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentArtifact {
    pub id: i64,
    pub filename: String,
    pub size: u64,
    pub hashes: ArtifactHashes,
}

/// One software module chunk of a deployment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentChunk {
    pub module: String,
    pub version: String,
    pub part: String,
    pub artifacts: Vec<DeploymentArtifact>,
}

/// Deployment base handed to the device-facing transport for an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPayload {
    pub ds_id: i64,
    pub ds_name: String,
    pub ds_version: String,
    pub chunks: Vec<DeploymentChunk>,
}

/// Assemble the deployment base for a distribution set, resolving each
/// artifact's stored hashes from the blob store.
pub fn deployment_payload(
    store: &dyn ArtifactStore,
    ds: &DistributionSet,
    modules: &[&SoftwareModule],
) -> Result<DeploymentPayload, CoreError> {
    let mut chunks = Vec::with_capacity(modules.len());
    for module in modules {
        let mut artifacts = Vec::with_capacity(module.artifacts.len());
        for meta in &module.artifacts {
            artifacts.push(DeploymentArtifact {
                id: meta.id,
                filename: meta.filename.clone(),
                size: meta.size,
                hashes: store.hashes(meta.id)?,
            });
        }
        chunks.push(DeploymentChunk {
            module: module.name.clone(),
            version: module.version.clone(),
            part: module.module_type.clone(),
            artifacts,
        });
    }
    Ok(DeploymentPayload {
        ds_id: ds.id,
        ds_name: ds.name.clone(),
        ds_version: ds.version.clone(),
        chunks,
    })
}
