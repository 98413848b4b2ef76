// Async client for a CKAN-style catalog action API.
//
// Endpoint: {base}/api/3/action/{action}
// Auth:     `Authorization: <api token>`
// Envelope: { success: bool, result: ..., error: {__type, message} | string }

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CatalogError;
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::TransportConfig;

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ActionEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// A catalog dataset (`package`). Unknown fields are carried through
/// so an update can send the dataset back without losing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A resource attached to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Resource {
    fn matches(&self, name: &str, format: &str) -> bool {
        let same_name = self
            .name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name));
        let same_format = self
            .format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case(format));
        same_name && same_format
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// Dataset metadata sent on create/update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetInfo {
    pub name: String,
    pub title: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<String>,
    pub tags: Vec<Tag>,
    /// Explicit replacement resource list. `None` preserves existing
    /// resources on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Resource>>,
}

#[derive(Serialize)]
struct DatasetUpdatePayload<'a> {
    id: &'a str,
    #[serde(flatten)]
    info: &'a DatasetInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<&'a [Resource]>,
}

/// Metadata for a new uploaded resource.
#[derive(Debug, Clone)]
pub struct ResourceUpload {
    pub name: String,
    pub format: String,
    pub description: String,
    /// Overrides the format-derived MIME type.
    pub mime_type: Option<String>,
}

/// Overrides for an in-place resource update; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub name: Option<String>,
    pub format: Option<String>,
    pub description: Option<String>,
}

/// Result of an upload or update. The post-ingest trigger never fails
/// the operation; its failure is reported here instead.
#[derive(Debug, Clone)]
pub struct Published {
    pub resource: Resource,
    pub ingest_error: Option<String>,
}

/// Compact dataset listing entry from `package_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub num_resources: u64,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default)]
    results: Vec<DatasetSummary>,
}

// ── MIME table ───────────────────────────────────────────────────────

/// MIME type for a resource format, case-insensitive.
pub fn mime_for_format(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "csv" => "text/csv",
        "json" => "application/json",
        "geojson" => "application/geo+json",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// HTTP method for [`CatalogClient::call_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMethod {
    Get,
    Post,
}

// ── Client ───────────────────────────────────────────────────────────

/// Client for the catalog action API.
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl CatalogClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client that sends the API token on every request.
    pub fn new(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(token.expose_secret()).map_err(|e| {
            CatalogError::Api {
                message: format!("invalid API token header value: {e}"),
                kind: None,
            }
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = transport.build_client(headers)?;
        Self::from_reqwest(base_url, http, transport.retry.clone())
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(
        base_url: &str,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<Self, CatalogError> {
        let mut base_url = Url::parse(base_url.trim())?;
        let path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path(&format!("{path}/"));
        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Public landing page URL for a dataset.
    pub fn dataset_url(&self, name: &str) -> String {
        format!(
            "{}/dataset/{name}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn action_url(&self, action: &str) -> Result<Url, CatalogError> {
        Ok(self.base_url.join(&format!("api/3/action/{action}"))?)
    }

    // ── Action calls ─────────────────────────────────────────────────

    async fn action_get<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let url = self.action_url(action)?;
        debug!(action, "catalog GET");

        with_retry(&self.retry, action, || async {
            let resp = self.http.get(url.clone()).query(params).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    async fn action_post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<T, CatalogError> {
        let url = self.action_url(action)?;
        debug!(action, "catalog POST");

        with_retry(&self.retry, action, || async {
            let resp = self.http.post(url.clone()).json(body).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    async fn action_multipart<T: DeserializeOwned>(
        &self,
        action: &str,
        fields: &[(&str, String)],
        file_name: &str,
        mime: &str,
        content: &[u8],
    ) -> Result<T, CatalogError> {
        let url = self.action_url(action)?;
        debug!(action, file_name, bytes = content.len(), "catalog multipart POST");

        with_retry(&self.retry, action, || async {
            let form = build_form(fields, file_name, mime, content)?;
            let resp = self.http.post(url.clone()).multipart(form).send().await?;
            parse_envelope(resp).await
        })
        .await
    }

    /// Call any action and return its raw `result`. For `Get`, a JSON
    /// object payload becomes query parameters.
    pub async fn call_action(
        &self,
        action: &str,
        method: ActionMethod,
        payload: &Value,
    ) -> Result<Value, CatalogError> {
        match method {
            ActionMethod::Get => {
                let params: Vec<(&str, String)> = payload
                    .as_object()
                    .map(|obj| {
                        obj.iter()
                            .map(|(k, v)| {
                                let v = match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                (k.as_str(), v)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.action_get(action, &params).await
            }
            ActionMethod::Post => self.action_post(action, payload).await,
        }
    }

    // ── Datasets ─────────────────────────────────────────────────────

    /// Fetch a dataset by id or name; `None` if the catalog reports it missing.
    pub async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>, CatalogError> {
        match self
            .action_get::<Dataset>("package_show", &[("id", id.to_owned())])
            .await
        {
            Ok(dataset) => Ok(Some(dataset)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_dataset(&self, info: &DatasetInfo) -> Result<Dataset, CatalogError> {
        info!(name = %info.name, "creating dataset");
        self.action_post("package_create", info).await
    }

    /// Replace a dataset's metadata. Resources are sent only when given.
    pub async fn update_dataset(
        &self,
        id: &str,
        info: &DatasetInfo,
        resources: Option<&[Resource]>,
    ) -> Result<Dataset, CatalogError> {
        info!(id, name = %info.name, "updating dataset");
        let payload = DatasetUpdatePayload {
            id,
            info,
            // `info` already serializes its own replacement list
            resources: if info.resources.is_some() { None } else { resources },
        };
        self.action_post("package_update", &payload).await
    }

    /// Show, then create or update. Existing resources survive an update
    /// unless `info.resources` supplies a replacement list.
    pub async fn create_or_update_dataset(
        &self,
        info: &DatasetInfo,
    ) -> Result<Dataset, CatalogError> {
        match self.get_dataset(&info.name).await? {
            Some(existing) => {
                self.update_dataset(&existing.id, info, Some(&existing.resources))
                    .await
            }
            None => self.create_dataset(info).await,
        }
    }

    /// Resources of a dataset; empty when the dataset does not exist.
    pub async fn dataset_resources(&self, dataset_id: &str) -> Result<Vec<Resource>, CatalogError> {
        Ok(self
            .get_dataset(dataset_id)
            .await?
            .map(|d| d.resources)
            .unwrap_or_default())
    }

    /// Datasets owned by an organization (first 1000).
    pub async fn list_datasets(
        &self,
        organization: &str,
    ) -> Result<Vec<DatasetSummary>, CatalogError> {
        let search: SearchResult = self
            .action_get(
                "package_search",
                &[
                    ("fq", format!("organization:{organization}")),
                    ("rows", "1000".to_owned()),
                ],
            )
            .await?;
        Ok(search.results)
    }

    // ── Resources ────────────────────────────────────────────────────

    pub async fn show_resource(&self, id: &str) -> Result<Resource, CatalogError> {
        self.action_get("resource_show", &[("id", id.to_owned())])
            .await
    }

    /// Case-insensitive exact match on name and format.
    pub async fn find_resource_by_name(
        &self,
        dataset_id: &str,
        name: &str,
        format: &str,
    ) -> Result<Option<Resource>, CatalogError> {
        let found = self
            .dataset_resources(dataset_id)
            .await?
            .into_iter()
            .find(|r| r.matches(name, format));

        match &found {
            Some(r) => debug!(dataset_id, name, id = %r.id, "found existing resource"),
            None => debug!(dataset_id, name, format, "no matching resource"),
        }
        Ok(found)
    }

    pub async fn delete_resource(&self, id: &str) -> Result<(), CatalogError> {
        info!(id, "deleting resource");
        let _: Value = self.action_post("resource_delete", &json!({ "id": id })).await?;
        Ok(())
    }

    /// Delete every resource whose name is in `names`. Individual delete
    /// failures are logged and skipped; returns how many were removed.
    pub async fn delete_resources_by_name(
        &self,
        dataset_id: &str,
        names: &[&str],
    ) -> Result<usize, CatalogError> {
        let resources = self.dataset_resources(dataset_id).await?;
        let mut deleted = 0;

        for resource in resources {
            let Some(name) = resource.name.as_deref() else {
                continue;
            };
            if !names.contains(&name) {
                continue;
            }
            match self.delete_resource(&resource.id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(id = %resource.id, name, error = %e, "failed to delete resource"),
            }
        }

        Ok(deleted)
    }

    /// Create a resource by multipart upload, then ask the catalog to
    /// ingest it.
    pub async fn upload_resource(
        &self,
        package_id: &str,
        content: &[u8],
        upload: &ResourceUpload,
    ) -> Result<Published, CatalogError> {
        let format = upload.format.to_ascii_lowercase();
        let mime = upload
            .mime_type
            .as_deref()
            .unwrap_or_else(|| mime_for_format(&format));
        let file_name = format!("{}.{format}", upload.name);
        info!(package_id, file_name, "uploading resource");

        let fields = [
            ("package_id", package_id.to_owned()),
            ("name", upload.name.clone()),
            ("description", upload.description.clone()),
            ("format", upload.format.to_ascii_uppercase()),
        ];
        let resource: Resource = self
            .action_multipart("resource_create", &fields, &file_name, mime, content)
            .await?;

        info!(id = %resource.id, "resource uploaded");
        Ok(self.finish_publish(resource).await)
    }

    /// Replace the content of an existing resource, defaulting name,
    /// format and description from its current metadata.
    pub async fn update_resource(
        &self,
        resource_id: &str,
        content: &[u8],
        update: &ResourceUpdate,
    ) -> Result<Published, CatalogError> {
        let current = self.show_resource(resource_id).await.map_err(|e| {
            warn!(resource_id, error = %e, "could not load resource before update");
            CatalogError::ResourceNotFound {
                id: resource_id.to_owned(),
            }
        })?;

        let name = update
            .name
            .clone()
            .or(current.name)
            .unwrap_or_else(|| "resource".to_owned());
        let format = update
            .format
            .clone()
            .or(current.format)
            .unwrap_or_else(|| "csv".to_owned());
        let description = update
            .description
            .clone()
            .or(current.description)
            .unwrap_or_default();

        let lower = format.to_ascii_lowercase();
        let file_name = format!("{name}.{lower}");
        info!(resource_id, file_name, "updating resource");

        let fields = [
            ("id", resource_id.to_owned()),
            ("name", name),
            ("description", description),
            ("format", format.to_ascii_uppercase()),
        ];
        let resource: Resource = self
            .action_multipart(
                "resource_update",
                &fields,
                &file_name,
                mime_for_format(&lower),
                content,
            )
            .await?;

        Ok(self.finish_publish(resource).await)
    }

    /// Ask the catalog to (re)load a resource into its queryable store.
    pub async fn trigger_ingest(&self, resource_id: &str) -> Result<(), CatalogError> {
        self.call_action(
            "datapusher_submit",
            ActionMethod::Post,
            &json!({ "resource_id": resource_id }),
        )
        .await?;
        info!(resource_id, "ingest triggered");
        Ok(())
    }

    async fn finish_publish(&self, resource: Resource) -> Published {
        let ingest_error = match self.trigger_ingest(&resource.id).await {
            Ok(()) => None,
            Err(e) => {
                warn!(id = %resource.id, error = %e, "ingest trigger failed (non-fatal)");
                Some(e.to_string())
            }
        };
        Published {
            resource,
            ingest_error,
        }
    }

    // ── Connectivity ─────────────────────────────────────────────────

    pub async fn test_connection(&self) -> bool {
        match self
            .call_action("status_show", ActionMethod::Get, &Value::Null)
            .await
        {
            Ok(status) => !status.is_null(),
            Err(e) => {
                warn!(error = %e, "catalog connection test failed");
                false
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn build_form(
    fields: &[(&str, String)],
    file_name: &str,
    mime: &str,
    content: &[u8],
) -> Result<Form, CatalogError> {
    let part = Part::bytes(content.to_vec())
        .file_name(file_name.to_owned())
        .mime_str(mime)?;
    let form = fields.iter().fold(Form::new(), |form, (key, value)| {
        form.text((*key).to_owned(), value.clone())
    });
    Ok(form.part("upload", part))
}

/// Unwrap the action envelope, turning `success: false` into a typed error.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CatalogError> {
    let status = resp.status();
    let body = resp.text().await?;

    let envelope: ActionEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(CatalogError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Err(e) => {
            return Err(CatalogError::Deserialization {
                message: e.to_string(),
                body,
            });
        }
    };

    if !envelope.success {
        return Err(api_error(envelope.error));
    }

    serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
        CatalogError::Deserialization {
            message: e.to_string(),
            body,
        }
    })
}

fn api_error(error: Option<Value>) -> CatalogError {
    match error {
        Some(Value::Object(obj)) => {
            let kind = obj.get("__type").and_then(Value::as_str).map(str::to_owned);
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(obj.clone()).to_string(), str::to_owned);
            CatalogError::Api { message, kind }
        }
        Some(Value::String(message)) => CatalogError::Api {
            message,
            kind: None,
        },
        Some(other) => CatalogError::Api {
            message: other.to_string(),
            kind: None,
        },
        None => CatalogError::Api {
            message: "unknown error".to_owned(),
            kind: None,
        },
    }
}
