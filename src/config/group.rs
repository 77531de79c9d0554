//! Per-group (and subgroup) configuration (§3 `GroupParams`).

use super::metadata::MarcMetadataParams;

/// Immutable per-group configuration. A subgroup is a `GroupParams` plus a
/// reference back to the group it refines; journals may name either.
#[derive(Debug, Clone)]
pub struct GroupParams {
    pub name: String,
    pub user_agent: String,
    pub isil: String,
    pub output_folder: String,
    pub author_lookup_url: Option<String>,
    pub marc_metadata_params: MarcMetadataParams,
}

#[derive(Debug, Clone)]
pub struct SubgroupParams {
    pub group: GroupParams,
    pub reference_group: String,
}
