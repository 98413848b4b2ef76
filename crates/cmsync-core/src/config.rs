// ── Runtime sync configuration ──
//
// These types describe *what* to sync and *where* to publish it. They
// carry credentials and tuning, but never touch disk: the config crate
// (or a test) builds a `SyncConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Serialize;
use url::Url;

use cmsync_api::{DatasetInfo, RetryPolicy, Tag, TransportConfig};

/// Catalog-side dataset metadata for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogDatasetConfig {
    pub name: String,
    pub title: String,
    pub notes: String,
    pub license_id: String,
    pub tags: Vec<String>,
}

/// One CMS model and how it maps onto a catalog dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub cms_model_id: String,
    pub dataset: CatalogDatasetConfig,
    /// Source field -> catalog column renames.
    pub field_mappings: IndexMap<String, String>,
    pub geometry_field: Option<String>,
    pub exclude_fields: Vec<String>,
    /// Alternate identifiers accepted from inbound webhooks.
    pub webhook_model_keys: Vec<String>,
}

impl ModelConfig {
    /// Minimal model whose dataset name and title equal the id.
    pub fn new(cms_model_id: impl Into<String>) -> Self {
        let id = cms_model_id.into();
        Self {
            dataset: CatalogDatasetConfig {
                name: id.clone(),
                title: id.clone(),
                notes: String::new(),
                license_id: "cc-by".into(),
                tags: Vec::new(),
            },
            cms_model_id: id,
            field_mappings: IndexMap::new(),
            geometry_field: None,
            exclude_fields: Vec::new(),
            webhook_model_keys: Vec::new(),
        }
    }

    pub fn csv_resource_name(&self) -> String {
        format!("{}_data", self.dataset.name)
    }

    pub fn geojson_resource_name(&self) -> String {
        format!("{}_geo", self.dataset.name)
    }

    pub fn geometry_field(&self) -> Option<&str> {
        self.geometry_field.as_deref().filter(|f| !f.is_empty())
    }

    /// Dataset metadata as sent on create/update.
    pub fn dataset_info(&self, organization: &str) -> DatasetInfo {
        DatasetInfo {
            name: self.dataset.name.clone(),
            title: self.dataset.title.clone(),
            notes: self.dataset.notes.clone(),
            owner_org: Some(organization.to_owned()),
            license_id: Some(self.dataset.license_id.clone()),
            tags: self
                .dataset
                .tags
                .iter()
                .map(|name| Tag { name: name.clone() })
                .collect(),
            resources: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: Url,
    /// Optional; public sources need none.
    pub token: Option<SecretString>,
    pub timeout: Duration,
    pub per_page: u32,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub url: Url,
    pub token: SecretString,
    pub organization: String,
    pub timeout: Duration,
}

/// Everything the engine needs for a run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: SourceSettings,
    pub catalog: CatalogSettings,
    /// Keyed by model id, in configuration order.
    pub models: IndexMap<String, ModelConfig>,
    /// Holds `sync_history.json` and `saved_jobs.json`.
    pub data_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Offset used for human-readable timestamps in resource descriptions.
    pub local_offset: FixedOffset,
}

impl SyncConfig {
    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.get(model_id)
    }

    pub fn source_transport(&self) -> TransportConfig {
        TransportConfig::default()
            .with_timeout(self.source.timeout)
            .with_retry(self.retry.clone())
    }

    pub fn catalog_transport(&self) -> TransportConfig {
        TransportConfig::default()
            .with_timeout(self.catalog.timeout)
            .with_retry(self.retry.clone())
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("sync_history.json")
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.data_dir.join("saved_jobs.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_follow_dataset_name() {
        let mut model = ModelConfig::new("shelters");
        model.dataset.name = "evacuation-shelters".into();
        assert_eq!(model.csv_resource_name(), "evacuation-shelters_data");
        assert_eq!(model.geojson_resource_name(), "evacuation-shelters_geo");
    }

    #[test]
    fn dataset_info_carries_owner_and_tags() {
        let mut model = ModelConfig::new("shelters");
        model.dataset.tags = vec!["disaster".into()];
        let info = model.dataset_info("city-org");
        assert_eq!(info.owner_org.as_deref(), Some("city-org"));
        assert_eq!(info.license_id.as_deref(), Some("cc-by"));
        assert_eq!(info.tags, vec![Tag { name: "disaster".into() }]);
        assert!(info.resources.is_none());
    }

    #[test]
    fn empty_geometry_field_counts_as_unset() {
        let mut model = ModelConfig::new("m");
        model.geometry_field = Some(String::new());
        assert_eq!(model.geometry_field(), None);
    }
}
