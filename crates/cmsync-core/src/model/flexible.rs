// ── Flexible sync request ──
//
// Ad-hoc sync description used by the HTTP API and saved jobs. Unknown
// fields are rejected at the boundary.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::CoreError;

/// Maps one CMS field onto a catalog column. No `ckan_field` drops it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub cms_field: String,
    #[serde(default)]
    pub ckan_field: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetMode {
    #[default]
    NewDataset,
    ExistingDataset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceMode {
    #[default]
    New,
    Update,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlexSyncRequest {
    pub cms_model_id: String,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub geometry_field: Option<String>,
    #[serde(default)]
    pub target_mode: TargetMode,
    #[serde(default)]
    pub new_dataset_name: Option<String>,
    #[serde(default)]
    pub new_dataset_title: Option<String>,
    #[serde(default)]
    pub existing_dataset_id: Option<String>,
    #[serde(default)]
    pub resource_mode: ResourceMode,
    #[serde(default)]
    pub existing_resource_id: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub include_geojson: bool,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl FlexSyncRequest {
    pub fn new(cms_model_id: impl Into<String>) -> Self {
        Self {
            cms_model_id: cms_model_id.into(),
            field_mappings: Vec::new(),
            geometry_field: None,
            target_mode: TargetMode::default(),
            new_dataset_name: None,
            new_dataset_title: None,
            existing_dataset_id: None,
            resource_mode: ResourceMode::default(),
            existing_resource_id: None,
            resource_name: None,
            dry_run: false,
            include_geojson: true,
        }
    }

    /// Reject requests whose mode needs an id that is missing.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut problems = Vec::new();
        if self.cms_model_id.trim().is_empty() {
            problems.push("cms_model_id is required");
        }
        if self.target_mode == TargetMode::ExistingDataset
            && present(self.existing_dataset_id.as_ref()).is_none()
        {
            problems.push("existing_dataset_id is required when target_mode is existing_dataset");
        }
        if self.resource_mode == ResourceMode::Update
            && self.target_mode == TargetMode::ExistingDataset
            && present(self.existing_resource_id.as_ref()).is_none()
        {
            problems.push("existing_resource_id is required when resource_mode is update");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ValidationFailed {
                message: problems.join("; "),
            })
        }
    }

    /// Split mappings into renames and exclusions.
    pub fn field_rules(&self) -> (IndexMap<String, String>, Vec<String>) {
        let mut renames = IndexMap::new();
        let mut exclude = Vec::new();
        for mapping in &self.field_mappings {
            match mapping.ckan_field.as_deref().map(str::trim) {
                None | Some("") => exclude.push(mapping.cms_field.clone()),
                Some(target) if target != mapping.cms_field => {
                    renames.insert(mapping.cms_field.clone(), target.to_owned());
                }
                Some(_) => {}
            }
        }
        (renames, exclude)
    }

    pub fn dataset_name(&self) -> &str {
        present(self.new_dataset_name.as_ref()).unwrap_or(&self.cms_model_id)
    }

    pub fn dataset_title(&self) -> &str {
        present(self.new_dataset_title.as_ref()).unwrap_or_else(|| self.dataset_name())
    }

    pub fn existing_dataset(&self) -> Option<&str> {
        present(self.existing_dataset_id.as_ref())
    }

    pub fn existing_resource(&self) -> Option<&str> {
        present(self.existing_resource_id.as_ref())
    }

    pub fn resource_name(&self) -> &str {
        present(self.resource_name.as_ref()).unwrap_or(&self.cms_model_id)
    }

    pub fn geometry_field(&self) -> Option<&str> {
        present(self.geometry_field.as_ref())
    }
}
