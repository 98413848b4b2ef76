// Shared fixtures: a stateful fake catalog and a mocked CMS source.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::FixedOffset;
use indexmap::IndexMap;
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use cmsync_api::{Record, RetryPolicy};
use cmsync_core::transform::json_to_csv;
use cmsync_core::{CatalogSettings, ModelConfig, SourceSettings, SyncConfig, SyncEngine};

pub const SOURCE_BASE: &str = "/api/p/ws/proj";

// ── Config ──────────────────────────────────────────────────────────

pub fn shelters_model() -> ModelConfig {
    let mut model = ModelConfig::new("shelters");
    model.dataset.title = "Evacuation shelters".into();
    model.geometry_field = Some("loc".into());
    model
}

pub fn config(source: &MockServer, catalog: &MockServer, data_dir: &Path) -> SyncConfig {
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
        models: IndexMap::from([("shelters".to_owned(), shelters_model())]),
        data_dir: data_dir.to_path_buf(),
        retry: RetryPolicy::immediate(),
        local_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
    }
}

pub async fn engine(source: &MockServer, catalog: &MockServer, data_dir: &Path) -> SyncEngine {
    SyncEngine::new(config(source, catalog, data_dir)).await.unwrap()
}

// ── Source ──────────────────────────────────────────────────────────

/// Three shelters, two with coordinates.
pub fn shelter_records() -> Vec<Value> {
    vec![
        json!({ "id": "s1", "name": "North school", "loc": { "lat": 35.0, "lng": 139.0 } }),
        json!({ "id": "s2", "name": "City hall", "loc": { "lat": 35.0, "lng": 139.0 } }),
        json!({ "id": "s3", "name": "Community center" }),
    ]
}

pub fn csv_for(records: &[Value]) -> String {
    let records: Vec<Record> = records
        .iter()
        .map(|r| r.as_object().unwrap().clone())
        .collect();
    json_to_csv(&records, &IndexMap::new(), &[]).unwrap()
}

/// Serve `{model}.csv` and the paginated item listing.
pub async fn mount_source(server: &MockServer, model: &str, records: &[Value]) {
    mount_source_with_delay(server, model, records, Duration::ZERO).await;
}

pub async fn mount_source_with_delay(
    server: &MockServer,
    model: &str,
    records: &[Value],
    delay: Duration,
) {
    Mock::given(method("GET"))
        .and(path(format!("{SOURCE_BASE}/{model}.csv")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(csv_for(records))
                .set_delay(delay),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{SOURCE_BASE}/{model}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": records,
            "totalCount": records.len()
        })))
        .mount(server)
        .await;
}

// ── Fake catalog ────────────────────────────────────────────────────

#[derive(Default)]
pub struct CatalogState {
    pub datasets: Vec<Value>,
    /// Uploaded file bodies by resource id.
    pub uploads: HashMap<String, String>,
    pub writes: usize,
    pub fail_format: Option<String>,
    pub fail_ingest: bool,
    next_id: usize,
}

impl CatalogState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn dataset_index(&self, id_or_name: &str) -> Option<usize> {
        self.datasets
            .iter()
            .position(|d| d["id"] == id_or_name || d["name"] == id_or_name)
    }

    fn find_resource(&mut self, id: &str) -> Option<&mut Value> {
        self.datasets
            .iter_mut()
            .flat_map(|d| d["resources"].as_array_mut().unwrap().iter_mut())
            .find(|r| r["id"] == id)
    }
}

/// In-memory catalog behind the action API, enough to exercise
/// reconciliation end to end.
#[derive(Clone, Default)]
pub struct FakeCatalog {
    state: Arc<Mutex<CatalogState>>,
}

fn ok(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "result": result }))
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "success": false,
        "error": { "__type": "Not Found Error", "message": "Not found" }
    }))
}

fn server_error(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_json(json!({
        "success": false,
        "error": { "message": message }
    }))
}

/// Value of a plain text multipart field.
fn form_field(body: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{name}\"\r\n\r\n");
    let start = body.find(&marker)? + marker.len();
    let end = body[start..].find("\r\n--")? + start;
    Some(body[start..end].to_owned())
}

/// Content of the file part.
fn form_file(body: &str) -> Option<String> {
    let start = body.find("filename=\"")?;
    let content_start = body[start..].find("\r\n\r\n")? + start + 4;
    let end = body[content_start..].find("\r\n--")? + content_start;
    Some(body[content_start..end].to_owned())
}

impl FakeCatalog {
    pub async fn mount(server: &MockServer) -> Self {
        let fake = Self::default();
        Mock::given(path_regex(r"^/api/3/action/[a-z_]+$"))
            .respond_with(fake.clone())
            .mount(server)
            .await;
        fake
    }

    pub fn fail_uploads_of(&self, format: &str) {
        self.state.lock().unwrap().fail_format = Some(format.to_owned());
    }

    pub fn fail_ingest(&self) {
        self.state.lock().unwrap().fail_ingest = true;
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn dataset(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.dataset_index(name).map(|i| state.datasets[i].clone())
    }

    pub fn resource_count(&self, dataset: &str) -> usize {
        self.dataset(dataset)
            .map_or(0, |d| d["resources"].as_array().unwrap().len())
    }

    /// Uploaded body of the resource with the given name.
    pub fn upload_named(&self, dataset: &str, resource: &str) -> Option<String> {
        let ds = self.dataset(dataset)?;
        let id = ds["resources"]
            .as_array()?
            .iter()
            .find(|r| r["name"] == resource)?["id"]
            .as_str()?
            .to_owned();
        self.state.lock().unwrap().uploads.get(&id).cloned()
    }

    /// Seed a dataset directly, bypassing the API.
    pub fn seed_dataset(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("ds");
        state
            .datasets
            .push(json!({ "id": id, "name": name, "title": name, "resources": [] }));
        id
    }
}

impl Respond for FakeCatalog {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let action = request.url.path().rsplit('/').next().unwrap_or_default();
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let body = String::from_utf8_lossy(&request.body).into_owned();
        let mut state = self.state.lock().unwrap();

        match action {
            "status_show" => ok(json!({ "ckan_version": "2.10.4" })),

            "package_show" => match state.dataset_index(&query["id"]) {
                Some(i) => ok(state.datasets[i].clone()),
                None => not_found(),
            },

            "package_create" => {
                state.writes += 1;
                let mut dataset: Value = serde_json::from_str(&body).unwrap();
                dataset["id"] = json!(state.next_id("ds"));
                dataset["resources"] = json!([]);
                state.datasets.push(dataset.clone());
                ok(dataset)
            }

            "package_update" => {
                state.writes += 1;
                let update: Value = serde_json::from_str(&body).unwrap();
                let Some(i) = state.dataset_index(update["id"].as_str().unwrap()) else {
                    return not_found();
                };
                let mut dataset = update.clone();
                if dataset.get("resources").is_none() {
                    dataset["resources"] = state.datasets[i]["resources"].clone();
                }
                state.datasets[i] = dataset.clone();
                ok(dataset)
            }

            "resource_create" => {
                let format = form_field(&body, "format").unwrap_or_default();
                if state
                    .fail_format
                    .as_deref()
                    .is_some_and(|f| f.eq_ignore_ascii_case(&format))
                {
                    return server_error("upload rejected");
                }
                state.writes += 1;
                let package_id = form_field(&body, "package_id").unwrap();
                let Some(i) = state.dataset_index(&package_id) else {
                    return not_found();
                };
                let id = state.next_id("res");
                let resource = json!({
                    "id": id,
                    "package_id": package_id,
                    "name": form_field(&body, "name"),
                    "format": format,
                    "description": form_field(&body, "description"),
                });
                state.datasets[i]["resources"]
                    .as_array_mut()
                    .unwrap()
                    .push(resource.clone());
                state.uploads.insert(id, form_file(&body).unwrap_or_default());
                ok(resource)
            }

            "resource_update" => {
                let id = form_field(&body, "id").unwrap();
                let content = form_file(&body).unwrap_or_default();
                let name = form_field(&body, "name");
                let description = form_field(&body, "description");
                let Some(resource) = state.find_resource(&id) else {
                    return not_found();
                };
                resource["name"] = json!(name);
                resource["description"] = json!(description);
                let updated = resource.clone();
                state.writes += 1;
                state.uploads.insert(id, content);
                ok(updated)
            }

            "resource_show" => match state.find_resource(&query["id"]) {
                Some(resource) => ok(resource.clone()),
                None => not_found(),
            },

            "resource_delete" => {
                let payload: Value = serde_json::from_str(&body).unwrap();
                let id = payload["id"].as_str().unwrap().to_owned();
                let mut removed = false;
                for dataset in &mut state.datasets {
                    let resources = dataset["resources"].as_array_mut().unwrap();
                    let before = resources.len();
                    resources.retain(|r| r["id"] != id.as_str());
                    removed |= resources.len() != before;
                }
                if removed {
                    state.writes += 1;
                    ok(Value::Null)
                } else {
                    not_found()
                }
            }

            "datapusher_submit" => {
                if state.fail_ingest {
                    server_error("datapusher unavailable")
                } else {
                    ok(json!({ "job_id": "push-1" }))
                }
            }

            _ => ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": { "message": format!("unknown action {action}") }
            })),
        }
    }
}
