// End-to-end orchestrator tests: wiremock CMS + stateful fake catalog.
#![allow(clippy::unwrap_used)]

mod common;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cmsync_core::{FieldMapping, FlexSyncRequest, ResourceMode, SyncOptions, SyncState, TargetMode};
use common::{FakeCatalog, SOURCE_BASE, engine, mount_source, shelter_records};

struct Harness {
    source: MockServer,
    catalog: MockServer,
    fake: FakeCatalog,
    dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let source = MockServer::start().await;
    let catalog = MockServer::start().await;
    let fake = FakeCatalog::mount(&catalog).await;
    Harness {
        source,
        catalog,
        fake,
        dir: tempfile::tempdir().unwrap(),
    }
}

// ── Canonical path ──────────────────────────────────────────────────

#[tokio::test]
async fn test_three_records_two_features() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;

    assert_eq!(result.status, SyncState::Success, "errors: {:?}", result.errors);
    assert_eq!(result.records_fetched, 3);
    assert_eq!(result.records_transformed, 3);
    assert_eq!(result.resources_uploaded, 2);
    assert_eq!(
        result.dataset_url.as_deref(),
        Some(format!("{}/dataset/shelters", h.catalog.uri()).as_str())
    );
    assert!(result.warnings.iter().any(|w| w.contains("1 records skipped")));

    let csv = h.fake.upload_named("shelters", "shelters_data").unwrap();
    assert_eq!(cmsync_core::transform::count_csv_rows(&csv), 3);

    let geo: Value =
        serde_json::from_str(&h.fake.upload_named("shelters", "shelters_geo").unwrap()).unwrap();
    assert_eq!(geo["type"], "FeatureCollection");
    assert_eq!(geo["features"].as_array().unwrap().len(), 2);
    assert_eq!(geo["features"][0]["geometry"]["coordinates"], json!([139.0, 35.0]));

    let dataset = h.fake.dataset("shelters").unwrap();
    assert_eq!(dataset["owner_org"], "city");
    assert_eq!(dataset["title"], "Evacuation shelters");
}

#[tokio::test]
async fn test_dry_run_writes_nothing_but_records_success() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::dry_run()).await;

    assert_eq!(result.status, SyncState::Success);
    assert!(result.dry_run);
    assert!(result.warnings.iter().any(|w| w == "Dry run - no data uploaded"));
    assert_eq!(h.fake.writes(), 0);
    assert!(h.catalog.received_requests().await.unwrap().is_empty());

    let history = engine.history().recent(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SyncState::Success);
    assert!(history[0].dry_run);
}

#[tokio::test]
async fn test_source_500_fails_with_prefix_and_one_history_entry() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(format!("{SOURCE_BASE}/shelters.csv")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.source)
        .await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;

    assert_eq!(result.status, SyncState::Failed);
    assert!(result.errors[0].starts_with("Source error: "), "{:?}", result.errors);
    assert!(result.completed_at.is_some());
    assert_eq!(engine.history().len().await, 1);
    assert_eq!(h.fake.writes(), 0);
}

#[tokio::test]
async fn test_unreachable_source_fails_after_retries() {
    let h = harness().await;
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = common::config(&h.source, &h.catalog, h.dir.path());
    config.source.base_url = url::Url::parse(&format!("http://127.0.0.1:{port}/api")).unwrap();
    let engine = cmsync_core::SyncEngine::new(config).await.unwrap();

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;
    assert_eq!(result.status, SyncState::Failed);
    assert!(result.errors[0].starts_with("Source error: HTTP transport error"));
}

#[tokio::test]
async fn test_empty_source_is_success_with_warning() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &[]).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;
    assert_eq!(result.status, SyncState::Success);
    assert_eq!(result.records_fetched, 0);
    assert_eq!(result.warnings, ["No data found in CMS model"]);
    assert_eq!(h.fake.writes(), 0);
}

#[tokio::test]
async fn test_unknown_model_is_recorded_failure() {
    let h = harness().await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("nope", &SyncOptions::default()).await;
    assert_eq!(result.status, SyncState::Failed);
    assert_eq!(result.errors, ["Model not found in configuration: nope"]);

    let smart = engine.sync_model_smart("nope").await;
    assert_eq!(smart.status, SyncState::Failed);
    assert_eq!(engine.history().len().await, 2);
}

#[tokio::test]
async fn test_force_replaces_managed_resources() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let force = SyncOptions {
        force: true,
        ..SyncOptions::default()
    };
    engine.sync_model("shelters", &force).await;
    let second = engine.sync_model("shelters", &force).await;

    assert_eq!(second.status, SyncState::Success);
    assert_eq!(h.fake.resource_count("shelters"), 2);
}

#[tokio::test]
async fn test_failed_update_falls_back_to_recreate() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let options = SyncOptions {
        update_resource_id: Some("res-missing".into()),
        ..SyncOptions::default()
    };
    let result = engine.sync_model("shelters", &options).await;

    assert_eq!(result.status, SyncState::Success, "errors: {:?}", result.errors);
    assert_eq!(result.resources_uploaded, 1);
    assert!(result.warnings.iter().any(|w| w.starts_with("Resource update failed")));
    // update mode never publishes GeoJSON
    assert_eq!(h.fake.resource_count("shelters"), 1);
    assert!(h.fake.upload_named("shelters", "shelters_data").is_some());
}

#[tokio::test]
async fn test_geojson_failure_after_csv_is_partial() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    h.fake.fail_uploads_of("GEOJSON");
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;

    assert_eq!(result.status, SyncState::Partial);
    assert_eq!(result.resources_uploaded, 1);
    assert!(result.errors[0].starts_with("Catalog error: GeoJSON upload failed"));
}

#[tokio::test]
async fn test_ingest_failure_is_a_warning() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    h.fake.fail_ingest();
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let result = engine.sync_model("shelters", &SyncOptions::default()).await;

    assert_eq!(result.status, SyncState::Success);
    assert_eq!(result.resources_uploaded, 2);
    assert!(result.warnings.iter().any(|w| w.starts_with("Ingest trigger failed")));
}

// ── Smart reconciliation ────────────────────────────────────────────

#[tokio::test]
async fn test_smart_sync_is_idempotent() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let first = engine.sync_model_smart("shelters").await;
    assert_eq!(first.status, SyncState::Success, "errors: {:?}", first.errors);
    let after_first = h.fake.resource_count("shelters");
    assert_eq!(after_first, 2);

    let second = engine.sync_model_smart("shelters").await;
    assert_eq!(second.status, SyncState::Success, "errors: {:?}", second.errors);
    assert_eq!(second.resources_uploaded, 1);
    assert_eq!(h.fake.resource_count("shelters"), after_first);
    assert!(second.warnings.iter().all(|w| !w.starts_with("Resource update failed")));
}

#[tokio::test]
async fn test_sync_all_runs_models_sequentially() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let ids = vec!["shelters".to_owned(), "missing".to_owned()];
    let results = engine.sync_all(Some(&ids), &SyncOptions::dry_run()).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, SyncState::Success);
    assert_eq!(results[1].status, SyncState::Failed);
    assert!(results[0].completed_at.unwrap() <= results[1].started_at);

    let status = engine.status(false).await;
    assert_eq!(status.total_syncs, 2);
    assert_eq!(status.failed_syncs, 1);
    assert_eq!(status.models.len(), 1);
    assert_eq!(
        status.models[0].last_sync.as_ref().unwrap().status,
        SyncState::Success
    );
}

// ── Flexible path ───────────────────────────────────────────────────

#[tokio::test]
async fn test_flexible_new_dataset_applies_mappings() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let mut request = FlexSyncRequest::new("shelters");
    request.new_dataset_name = Some("shelter-list".into());
    request.resource_name = Some("list".into());
    request.geometry_field = Some("loc".into());
    request.field_mappings = vec![
        FieldMapping {
            cms_field: "name".into(),
            ckan_field: Some("title".into()),
        },
        FieldMapping {
            cms_field: "loc".into(),
            ckan_field: None,
        },
    ];

    let result = engine.sync_flexible(&request).await;

    assert_eq!(result.status, SyncState::Success, "errors: {:?}", result.errors);
    assert_eq!(result.model_id, "shelters");
    assert_eq!(result.records_fetched, 3);
    assert_eq!(result.resources_uploaded, 2);

    let csv = h.fake.upload_named("shelter-list", "list").unwrap();
    assert_eq!(csv.lines().next().unwrap(), "id,title");
    assert!(h.fake.upload_named("shelter-list", "list_geo").is_some());

    let dataset = h.fake.dataset("shelter-list").unwrap();
    assert_eq!(dataset["notes"], "Data synced from CMS model: shelters");
    assert_eq!(dataset["license_id"], "cc-by");
}

#[tokio::test]
async fn test_flexible_geojson_failure_after_csv_is_partial() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    h.fake.fail_uploads_of("GEOJSON");
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let mut request = FlexSyncRequest::new("shelters");
    request.new_dataset_name = Some("shelter-map".into());
    request.geometry_field = Some("loc".into());

    let result = engine.sync_flexible(&request).await;

    assert_eq!(result.status, SyncState::Partial);
    assert_eq!(result.resources_uploaded, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Catalog error: GeoJSON upload failed"));
    assert!(h.fake.upload_named("shelter-map", "shelters").is_some());
    assert!(h.fake.upload_named("shelter-map", "shelters_geo").is_none());
    assert_eq!(engine.history().recent(1).await[0].status, SyncState::Partial);
}

#[tokio::test]
async fn test_flexible_missing_dataset_fails() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let mut request = FlexSyncRequest::new("shelters");
    request.target_mode = TargetMode::ExistingDataset;
    request.existing_dataset_id = Some("nope".into());

    let result = engine.sync_flexible(&request).await;
    assert_eq!(result.status, SyncState::Failed);
    assert_eq!(result.errors, ["Catalog error: Dataset not found: nope"]);
    assert_eq!(engine.history().len().await, 1);
}

#[tokio::test]
async fn test_flexible_updates_existing_resource() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;
    h.fake.seed_dataset("open-data");

    let mut create = FlexSyncRequest::new("shelters");
    create.target_mode = TargetMode::ExistingDataset;
    create.existing_dataset_id = Some("open-data".into());
    create.include_geojson = false;
    engine.sync_flexible(&create).await;
    let resource_id = h.fake.dataset("open-data").unwrap()["resources"][0]["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let mut update = create.clone();
    update.resource_mode = ResourceMode::Update;
    update.existing_resource_id = Some(resource_id);
    let result = engine.sync_flexible(&update).await;

    assert_eq!(result.status, SyncState::Success, "errors: {:?}", result.errors);
    assert_eq!(h.fake.resource_count("open-data"), 1);
}

// ── Read side ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_reports_latest_run_per_model() {
    let h = harness().await;
    mount_source(&h.source, "shelters", &shelter_records()).await;
    let engine = engine(&h.source, &h.catalog, h.dir.path()).await;

    let first = engine.sync_model("shelters", &SyncOptions::default()).await;
    assert_eq!(first.status, SyncState::Success, "errors: {:?}", first.errors);
    engine.sync_model("parks", &SyncOptions::default()).await;
    h.fake.fail_uploads_of("CSV");
    let last = engine.sync_model("shelters", &SyncOptions::default()).await;
    assert_eq!(last.status, SyncState::Failed);

    let status = engine.status(false).await;

    assert_eq!(status.total_syncs, 3);
    assert_eq!(status.successful_syncs, 1);
    assert_eq!(status.failed_syncs, 2);
    assert_eq!(status.last_run, Some(last.started_at));
    assert_eq!(status.models.len(), 1);
    let shelters = &status.models[0];
    assert_eq!(shelters.model_id, "shelters");
    assert!(!shelters.is_syncing);
    assert_eq!(
        shelters.last_sync.as_ref().map(|r| r.started_at),
        Some(last.started_at)
    );
}
