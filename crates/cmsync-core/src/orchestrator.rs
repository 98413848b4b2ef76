// ── Sync orchestrator ──
//
// Sequences one run per model: source fetch, transform, catalog
// reconciliation, history append. A run never returns an error; every
// failure is classified onto the `SyncResult` and the result is always
// recorded.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cmsync_api::{
    CatalogClient, CatalogError, DatasetInfo, DatasetSummary, Published, Resource, ResourceUpdate,
    ResourceUpload, SourceClient, SourceError,
};

use crate::config::{ModelConfig, SyncConfig};
use crate::error::CoreError;
use crate::model::{
    ConnectionReport, FlexSyncRequest, ModelSyncStatus, ResourceMode, SyncOptions, SyncResult,
    SyncState, SyncStatus, TargetMode,
};
use crate::store::HistoryStore;
use crate::transform::{
    FeatureCollection, TransformError, count_csv_rows, has_geometry_data, json_to_csv,
    json_to_geojson,
};

/// Why a run stopped. Each variant carries its own message prefix.
#[derive(Debug)]
enum SyncFailure {
    Source(SourceError),
    Catalog(CatalogError),
    Unexpected(String),
}

impl SyncFailure {
    fn message(&self) -> String {
        match self {
            Self::Source(e) => format!("Source error: {e}"),
            Self::Catalog(e) => format!("Catalog error: {e}"),
            Self::Unexpected(msg) => format!("Unexpected error: {msg}"),
        }
    }
}

impl From<SourceError> for SyncFailure {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<CatalogError> for SyncFailure {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

impl From<TransformError> for SyncFailure {
    fn from(e: TransformError) -> Self {
        Self::Unexpected(e.to_string())
    }
}

/// Owns both clients and the history journal. All entry points are
/// `&self`; exclusivity is enforced one level up by the job gate.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    source: SourceClient,
    catalog: CatalogClient,
    history: Arc<HistoryStore>,
    current: watch::Sender<Option<String>>,
}

impl SyncEngine {
    /// Build clients from the configuration and open the history file.
    pub async fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let source = SourceClient::new(
            config.source.base_url.as_str(),
            config.source.token.as_ref(),
            &config.source_transport(),
        )?
        .with_page_size(config.source.per_page);
        let catalog = CatalogClient::new(
            config.catalog.url.as_str(),
            &config.catalog.token,
            &config.catalog_transport(),
        )?;
        let history = HistoryStore::open(config.history_path()).await;
        Ok(Self::from_parts(config, source, catalog, Arc::new(history)))
    }

    pub fn from_parts(
        config: SyncConfig,
        source: SourceClient,
        catalog: CatalogClient,
        history: Arc<HistoryStore>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            config: Arc::new(config),
            source,
            catalog,
            history,
            current,
        }
    }

    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.config
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Model currently being synced, if any.
    pub fn current_model(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    fn set_current(&self, model_id: Option<&str>) {
        self.current.send_replace(model_id.map(str::to_owned));
    }

    /// Description timestamp in the configured local offset.
    fn local_stamp(&self) -> String {
        Utc::now()
            .with_timezone(&self.config.local_offset)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string()
    }

    async fn record(&self, mut result: SyncResult) -> SyncResult {
        result.finish();
        self.history.append(result.clone()).await;
        result
    }

    async fn record_failure(&self, model_id: &str, message: String) -> SyncResult {
        let mut result = SyncResult::start(model_id, false);
        result.fail(message);
        self.record(result).await
    }

    // ── Canonical path ───────────────────────────────────────────────

    /// Sync one configured model. The result is always recorded.
    pub async fn sync_model(&self, model_id: &str, options: &SyncOptions) -> SyncResult {
        let mut result = SyncResult::start(model_id, options.dry_run);

        let Some(model) = self.config.model(model_id) else {
            warn!(model_id, "model not found in configuration");
            result.fail(format!("Model not found in configuration: {model_id}"));
            return self.record(result).await;
        };

        self.set_current(Some(model_id));
        info!(
            model_id,
            dry_run = options.dry_run,
            force = options.force,
            update_resource_id = options.update_resource_id.as_deref(),
            "starting sync"
        );

        match self.run_model(model, options, &mut result).await {
            Ok(()) => info!(model_id, status = %result.status, "sync finished"),
            Err(failure) => {
                let message = failure.message();
                error!(model_id, error = %message, "sync failed");
                result.fail(message);
            }
        }

        self.set_current(None);
        self.record(result).await
    }

    async fn run_model(
        &self,
        model: &ModelConfig,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) -> Result<(), SyncFailure> {
        // CSV export keeps the CMS column order
        let csv_text = self.source.fetch_csv(&model.cms_model_id).await?;
        let rows = count_csv_rows(&csv_text);
        result.records_fetched = rows;
        result.records_transformed = rows;

        if rows == 0 {
            result.warn("No data found in CMS model");
            return Ok(());
        }

        let geojson = match self.build_geojson(model).await? {
            Some(fc) => {
                if fc.skipped > 0 {
                    result.warn(format!(
                        "{} records skipped from GeoJSON (no geometry)",
                        fc.skipped
                    ));
                }
                Some(fc.to_pretty_json()?)
            }
            None => None,
        };

        if options.dry_run {
            info!(model_id = %result.model_id, "dry run, skipping catalog upload");
            result.warn("Dry run - no data uploaded");
            return Ok(());
        }

        let info = model.dataset_info(&self.config.catalog.organization);
        let dataset = self.catalog.create_or_update_dataset(&info).await?;
        result.dataset_id = Some(dataset.id.clone());
        result.dataset_url = Some(self.catalog.dataset_url(&model.dataset.name));

        let csv_name = model.csv_resource_name();
        let geo_name = model.geojson_resource_name();

        if options.force {
            let mut names = vec![csv_name.as_str()];
            if geojson.is_some() {
                names.push(geo_name.as_str());
            }
            let deleted = self
                .catalog
                .delete_resources_by_name(&dataset.id, &names)
                .await?;
            info!(dataset = %dataset.id, deleted, "force mode, removed managed resources");
        }

        let stamp = self.local_stamp();
        let csv_upload = ResourceUpload {
            name: csv_name,
            format: "csv".into(),
            description: format!("Data in CSV format (synced from CMS at {stamp})"),
            mime_type: None,
        };

        let published = match options.update_resource_id.as_deref() {
            Some(resource_id) => {
                self.replace_resource(&dataset.id, resource_id, csv_text.as_bytes(), &csv_upload, result)
                    .await?
            }
            None => {
                self.catalog
                    .upload_resource(&dataset.id, csv_text.as_bytes(), &csv_upload)
                    .await?
            }
        };
        note_published(result, &published);

        // Update mode only refreshes the tabular resource
        if let (Some(geo), None) = (geojson, options.update_resource_id.as_deref()) {
            let upload = ResourceUpload {
                name: geo_name,
                format: "geojson".into(),
                description: format!(
                    "Geographic data in GeoJSON format (synced from CMS at {stamp})"
                ),
                mime_type: None,
            };
            self.publish_geojson(&dataset.id, &geo, &upload, result).await;
        }

        Ok(())
    }

    /// Upload the GeoJSON resource once the CSV is already published. A
    /// failure here leaves the run PARTIAL instead of FAILED.
    async fn publish_geojson(
        &self,
        dataset_id: &str,
        geo: &str,
        upload: &ResourceUpload,
        result: &mut SyncResult,
    ) {
        match self
            .catalog
            .upload_resource(dataset_id, geo.as_bytes(), upload)
            .await
        {
            Ok(published) => note_published(result, &published),
            Err(e) => {
                warn!(dataset = %dataset_id, error = %e, "GeoJSON upload failed after CSV was published");
                result
                    .errors
                    .push(format!("Catalog error: GeoJSON upload failed: {e}"));
                result.status = SyncState::Partial;
            }
        }
    }

    /// Fetch structured items and build a FeatureCollection, when the
    /// model has a geometry field and at least one item resolves.
    async fn build_geojson(
        &self,
        model: &ModelConfig,
    ) -> Result<Option<FeatureCollection>, SyncFailure> {
        let Some(field) = model.geometry_field() else {
            return Ok(None);
        };

        let items = self.source.fetch_all_items(&model.cms_model_id).await?;
        if !has_geometry_data(&items, field) {
            debug!(model = %model.cms_model_id, field, "no resolvable geometry");
            return Ok(None);
        }
        Ok(json_to_geojson(&items, field, &model.exclude_fields))
    }

    /// Update in place; on failure delete the old resource (best effort)
    /// and create a fresh one.
    async fn replace_resource(
        &self,
        dataset_id: &str,
        resource_id: &str,
        content: &[u8],
        upload: &ResourceUpload,
        result: &mut SyncResult,
    ) -> Result<Published, SyncFailure> {
        let update = ResourceUpdate {
            name: Some(upload.name.clone()),
            format: Some(upload.format.clone()),
            description: Some(upload.description.clone()),
        };

        match self
            .catalog
            .update_resource(resource_id, content, &update)
            .await
        {
            Ok(published) => Ok(published),
            Err(e) => {
                warn!(resource_id, error = %e, "resource update failed, recreating");
                result.warn(format!("Resource update failed ({e}); recreated"));
                if let Err(e) = self.catalog.delete_resource(resource_id).await {
                    debug!(resource_id, error = %e, "delete before recreate failed");
                }
                Ok(self
                    .catalog
                    .upload_resource(dataset_id, content, upload)
                    .await?)
            }
        }
    }

    // ── Smart reconciliation ─────────────────────────────────────────

    /// Update the managed CSV resource if it exists, otherwise create it.
    /// Repeated runs never add a second managed resource.
    pub async fn sync_model_smart(&self, model_id: &str) -> SyncResult {
        let Some(model) = self.config.model(model_id) else {
            warn!(model_id, "smart sync: model not found in configuration");
            return self
                .record_failure(model_id, format!("Model not found in configuration: {model_id}"))
                .await;
        };

        match self.find_managed_csv(model).await {
            Ok(Some(resource_id)) => {
                info!(model_id, resource_id, "smart sync: updating existing resource");
                let options = SyncOptions {
                    update_resource_id: Some(resource_id),
                    ..SyncOptions::default()
                };
                self.sync_model(model_id, &options).await
            }
            Ok(None) => {
                info!(model_id, "smart sync: creating new resource");
                self.sync_model(model_id, &SyncOptions::default()).await
            }
            Err(e) => {
                error!(model_id, error = %e, "smart sync failed");
                self.record_failure(model_id, SyncFailure::Catalog(e).message())
                    .await
            }
        }
    }

    async fn find_managed_csv(&self, model: &ModelConfig) -> Result<Option<String>, CatalogError> {
        let info = model.dataset_info(&self.config.catalog.organization);
        let dataset = self.catalog.create_or_update_dataset(&info).await?;
        let found = self
            .catalog
            .find_resource_by_name(&dataset.id, &model.csv_resource_name(), "CSV")
            .await?;
        Ok(found.map(|r| r.id))
    }

    // ── Batches ──────────────────────────────────────────────────────

    fn resolve_ids(&self, model_ids: Option<&[String]>) -> Vec<String> {
        model_ids.map_or_else(|| self.config.models.keys().cloned().collect(), <[String]>::to_vec)
    }

    /// Sync the given models (all configured when `None`), one at a time.
    pub async fn sync_all(
        &self,
        model_ids: Option<&[String]>,
        options: &SyncOptions,
    ) -> Vec<SyncResult> {
        let ids = self.resolve_ids(model_ids);
        info!(count = ids.len(), "starting sync");

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            results.push(self.sync_model(id, options).await);
        }
        log_summary(&results);
        results
    }

    pub async fn sync_all_smart(&self, model_ids: Option<&[String]>) -> Vec<SyncResult> {
        let ids = self.resolve_ids(model_ids);
        info!(count = ids.len(), "starting smart sync");

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            results.push(self.sync_model_smart(id).await);
        }
        log_summary(&results);
        results
    }

    // ── Flexible path ────────────────────────────────────────────────

    /// Ad-hoc sync with caller-chosen target dataset, resource mode and
    /// field mappings. The result's `model_id` is the CMS model id.
    pub async fn sync_flexible(&self, request: &FlexSyncRequest) -> SyncResult {
        let mut result = SyncResult::start(&request.cms_model_id, request.dry_run);

        if let Err(e) = request.validate() {
            result.fail(e.to_string());
            return self.record(result).await;
        }

        self.set_current(Some(&request.cms_model_id));
        info!(
            model = %request.cms_model_id,
            target_mode = %request.target_mode,
            resource_mode = %request.resource_mode,
            dry_run = request.dry_run,
            "starting flexible sync"
        );

        if let Err(failure) = self.run_flexible(request, &mut result).await {
            let message = failure.message();
            error!(model = %request.cms_model_id, error = %message, "flexible sync failed");
            result.fail(message);
        }

        self.set_current(None);
        self.record(result).await
    }

    async fn run_flexible(
        &self,
        request: &FlexSyncRequest,
        result: &mut SyncResult,
    ) -> Result<(), SyncFailure> {
        let items = self.source.fetch_all_items(&request.cms_model_id).await?;
        result.records_fetched = items.len();

        if items.is_empty() {
            result.warn("No data found in CMS model");
            return Ok(());
        }

        let (renames, exclude) = request.field_rules();
        let csv_text = json_to_csv(&items, &renames, &exclude)?;
        result.records_transformed = items.len();

        let geojson = request
            .geometry_field()
            .filter(|field| request.include_geojson && has_geometry_data(&items, field))
            .and_then(|field| json_to_geojson(&items, field, &exclude))
            .map(|fc| fc.to_pretty_json())
            .transpose()?;

        if request.dry_run {
            info!(model = %request.cms_model_id, "dry run, skipping catalog upload");
            result.warn("Dry run - no data uploaded");
            return Ok(());
        }

        let (dataset_id, dataset_name) = match request.target_mode {
            TargetMode::NewDataset => {
                let info = DatasetInfo {
                    name: request.dataset_name().to_owned(),
                    title: request.dataset_title().to_owned(),
                    notes: format!("Data synced from CMS model: {}", request.cms_model_id),
                    owner_org: Some(self.config.catalog.organization.clone()),
                    license_id: Some("cc-by".into()),
                    tags: Vec::new(),
                    resources: None,
                };
                let dataset = self.catalog.create_or_update_dataset(&info).await?;
                (dataset.id, info.name)
            }
            TargetMode::ExistingDataset => {
                let id = request.existing_dataset().unwrap_or_default();
                let dataset = self
                    .catalog
                    .get_dataset(id)
                    .await?
                    .ok_or_else(|| CatalogError::DatasetNotFound { id: id.to_owned() })?;
                (dataset.id, dataset.name)
            }
        };
        result.dataset_id = Some(dataset_id.clone());
        result.dataset_url = Some(self.catalog.dataset_url(&dataset_name));

        let stamp = self.local_stamp();
        let resource_name = request.resource_name();
        let upload = ResourceUpload {
            name: resource_name.to_owned(),
            format: "csv".into(),
            description: format!("Data synced from CMS at {stamp}"),
            mime_type: None,
        };

        let published = match request.existing_resource() {
            Some(resource_id) if request.resource_mode == ResourceMode::Update => {
                self.replace_resource(&dataset_id, resource_id, csv_text.as_bytes(), &upload, result)
                    .await?
            }
            _ => {
                self.catalog
                    .upload_resource(&dataset_id, csv_text.as_bytes(), &upload)
                    .await?
            }
        };
        note_published(result, &published);

        if let Some(geo) = geojson {
            let upload = ResourceUpload {
                name: format!("{resource_name}_geo"),
                format: "geojson".into(),
                description: format!("Geographic data synced from CMS at {stamp}"),
                mime_type: None,
            };
            self.publish_geojson(&dataset_id, &geo, &upload, result).await;
        }

        Ok(())
    }

    // ── Read side ────────────────────────────────────────────────────

    /// Datasets owned by the configured organization. Used to pick the
    /// target of a flexible sync.
    pub async fn catalog_datasets(&self) -> Result<Vec<DatasetSummary>, CoreError> {
        let datasets = self
            .catalog
            .list_datasets(&self.config.catalog.organization)
            .await?;
        debug!(count = datasets.len(), "listed catalog datasets");
        Ok(datasets)
    }

    /// Resources of one dataset; empty when the dataset does not exist.
    pub async fn catalog_resources(&self, dataset_id: &str) -> Result<Vec<Resource>, CoreError> {
        Ok(self.catalog.dataset_resources(dataset_id).await?)
    }

    pub async fn test_connections(&self) -> ConnectionReport {
        let (source, catalog) =
            tokio::join!(self.source.test_connection(), self.catalog.test_connection());
        info!(source, catalog, "connection test finished");
        ConnectionReport { source, catalog }
    }

    /// Snapshot of configured models and history totals.
    pub async fn status(&self, is_running: bool) -> SyncStatus {
        let current = self.current_model();

        let mut models = Vec::with_capacity(self.config.models.len());
        for (id, model) in &self.config.models {
            models.push(ModelSyncStatus {
                model_id: id.clone(),
                cms_model_id: model.cms_model_id.clone(),
                dataset_name: model.dataset.name.clone(),
                last_sync: self.history.latest_for(id).await,
                is_syncing: current.as_deref() == Some(id.as_str()),
            });
        }

        let entries = self.history.all().await;
        SyncStatus {
            is_running,
            current_model: current,
            models,
            last_run: entries.iter().map(|r| r.started_at).max(),
            total_syncs: entries.len(),
            successful_syncs: self.history.count_with(SyncState::Success).await,
            failed_syncs: self.history.count_with(SyncState::Failed).await,
        }
    }
}

fn note_published(result: &mut SyncResult, published: &Published) {
    result.resources_uploaded += 1;
    if let Some(e) = &published.ingest_error {
        result.warn(format!(
            "Ingest trigger failed for resource {}: {e}",
            published.resource.id
        ));
    }
}

fn log_summary(results: &[SyncResult]) {
    let success = results
        .iter()
        .filter(|r| r.status == SyncState::Success)
        .count();
    let failed = results.iter().filter(|r| r.is_failed()).count();
    info!(total = results.len(), success, failed, "sync batch completed");
}
