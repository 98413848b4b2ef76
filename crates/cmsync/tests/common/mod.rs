// Fixtures for the binary crate: a mocked CMS and a catalog that only
// answers its status probe.
#![allow(clippy::unwrap_used, dead_code)]

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use indexmap::IndexMap;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cmsync::server::{AppState, BasicCredentials, build_router};
use cmsync_api::RetryPolicy;
use cmsync_core::{
    CatalogSettings, JobStore, ModelConfig, SourceSettings, SyncConfig, SyncEngine, SyncService,
};

pub const SOURCE_BASE: &str = "/api/p/ws/proj";
pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "hunter2";
pub const WEBHOOK_SECRET: &str = "whsec";

pub fn sync_config(source: &MockServer, catalog: &MockServer, data_dir: &Path) -> SyncConfig {
    let mut shelters = ModelConfig::new("shelters");
    shelters.geometry_field = Some("loc".into());
    shelters.webhook_model_keys = vec!["shelter-v2".into()];

    SyncConfig {
        source: SourceSettings {
            base_url: Url::parse(&format!("{}{SOURCE_BASE}", source.uri())).unwrap(),
            token: None,
            timeout: Duration::from_secs(5),
            per_page: 100,
        },
        catalog: CatalogSettings {
            url: Url::parse(&catalog.uri()).unwrap(),
            token: SecretString::from("catalog-token".to_owned()),
            organization: "city".into(),
            timeout: Duration::from_secs(5),
        },
        models: IndexMap::from([("shelters".to_owned(), shelters)]),
        data_dir: data_dir.to_path_buf(),
        retry: RetryPolicy::immediate(),
        local_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
    }
}

pub fn shelter_records() -> Vec<Value> {
    vec![
        json!({ "id": "s1", "name": "North school", "loc": { "lat": 35.0, "lng": 139.0 } }),
        json!({ "id": "s2", "name": "Community center" }),
    ]
}

/// Serve `{model}.csv` and the item listing, the CSV after `delay`.
pub async fn mount_source(server: &MockServer, model: &str, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("{SOURCE_BASE}/{model}.csv")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("id,name\ns1,North school\ns2,Community center\n")
                .set_delay(delay),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{SOURCE_BASE}/{model}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": shelter_records(),
            "totalCount": 2
        })))
        .mount(server)
        .await;
}

pub async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/3/action/status_show"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": { "ckan_version": "2.10.4" }
        })))
        .mount(server)
        .await;
}

/// A started service plus the mock servers and data dir it depends on.
pub struct Harness {
    pub service: SyncService,
    pub source: MockServer,
    pub catalog: MockServer,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn start(source_delay: Duration) -> Self {
        let source = MockServer::start().await;
        let catalog = MockServer::start().await;
        mount_source(&source, "shelters", source_delay).await;
        mount_catalog(&catalog).await;

        let dir = tempfile::tempdir().unwrap();
        let config = sync_config(&source, &catalog, dir.path());
        let jobs = JobStore::open(config.jobs_path()).await;
        let engine = SyncEngine::new(config).await.unwrap();
        Self {
            service: SyncService::start(engine, jobs),
            source,
            catalog,
            dir,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(
            self.service.clone(),
            Some(BasicCredentials::new(
                USERNAME,
                SecretString::from(PASSWORD.to_owned()),
            )),
            Some(SecretString::from(WEBHOOK_SECRET.to_owned())),
        ))
    }

    /// Router with neither a password nor a webhook secret configured.
    pub fn open_router(&self) -> axum::Router {
        build_router(AppState::new(self.service.clone(), None, None))
    }
}
