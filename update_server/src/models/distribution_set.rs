//! DistributionSet — a named, versioned bundle of software modules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Artifact metadata carried by a software module. Binary content and
/// hashes live in the blob store collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: i64,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareModule {
    pub id: i64,
    pub tenant_id: Uuid,
    pub name: String,
    pub version: String,
    /// Module type key, checked against the distribution set type.
    pub module_type: String,
    pub artifacts: Vec<ArtifactMeta>,
}

/// Defines the allowed module-type composition of a distribution set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSetType {
    pub key: String,
    pub name: String,
    pub mandatory_module_types: Vec<String>,
    pub optional_module_types: Vec<String>,
}

impl DistributionSetType {
    pub fn allows(&self, module_type: &str) -> bool {
        self.mandatory_module_types.iter().any(|t| t == module_type)
            || self.optional_module_types.iter().any(|t| t == module_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSet {
    pub id: i64,
    pub tenant_id: Uuid,
    pub name: String,
    pub version: String,
    pub ds_type: String,
    pub module_ids: Vec<i64>,
    /// Invalidated sets cannot be newly assigned; existing assignments stay
    /// untouched unless invalidation-with-cancel was requested.
    pub valid: bool,
    /// All mandatory module types of `ds_type` are filled.
    pub complete: bool,
    pub required_migration_step: bool,
}

impl DistributionSet {
    pub fn assignable(&self) -> bool {
        self.valid && self.complete
    }
}
