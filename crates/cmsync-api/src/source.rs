// Async client for the headless-CMS public content API.
//
// Items:  GET {base}/{model}?page=N&perPage=M  -> { results, totalCount }
// Export: GET {base}/{model}.csv               -> text/csv
// Auth:   optional `Authorization: Bearer <token>`

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SourceError;
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::TransportConfig;

/// A single CMS item, kept as an ordered JSON object.
pub type Record = serde_json::Map<String, Value>;

const DEFAULT_PER_PAGE: u32 = 100;

/// One page of the items listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsPage {
    #[serde(default)]
    pub results: Vec<Record>,
    /// Declared total across all pages, when the CMS reports it.
    #[serde(default)]
    pub total_count: Option<usize>,
}

/// Client for the CMS content API.
///
/// Every request runs through the shared [`RetryPolicy`]; only
/// timeouts and connection failures are retried.
pub struct SourceClient {
    http: reqwest::Client,
    base_url: Url,
    per_page: u32,
    retry: RetryPolicy,
}

impl SourceClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build a client, injecting the bearer token when one is configured.
    pub fn new(
        base_url: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token.filter(|t| !t.expose_secret().is_empty()) {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            } else {
                warn!("CMS token contains characters not valid in a header; sending unauthenticated");
            }
        }

        let http = transport.build_client(headers)?;
        Self::from_reqwest(base_url, http, transport.retry.clone())
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(
        base_url: &str,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            per_page: DEFAULT_PER_PAGE,
            retry,
        })
    }

    /// Override the page size used by [`fetch_all_items`](Self::fetch_all_items).
    pub fn with_page_size(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── Items ────────────────────────────────────────────────────────

    /// Fetch one page of items (1-based page numbers).
    pub async fn fetch_model_items(
        &self,
        model_id: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ItemsPage, SourceError> {
        let url = self.url(model_id)?;
        let params = [("page", page.to_string()), ("perPage", per_page.to_string())];
        debug!(%url, page, per_page, "fetching CMS items");

        let body = with_retry(&self.retry, "fetch_model_items", || async {
            let resp = self.http.get(url.clone()).query(&params).send().await?;
            let resp = classify_status(resp, model_id)?;
            Ok::<_, SourceError>(resp.text().await?)
        })
        .await?;

        serde_json::from_str(&body).map_err(|e| SourceError::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Drain pagination, stopping on a short page or once the declared
    /// total is reached.
    pub async fn fetch_all_items(&self, model_id: &str) -> Result<Vec<Record>, SourceError> {
        let per_page = self.per_page;
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.fetch_model_items(model_id, page, per_page).await?;
            let received = batch.results.len();
            let total = batch.total_count.unwrap_or(received);
            all.extend(batch.results);

            debug!(model_id, page, received, total, "fetched items page");

            if all.len() >= total || received < per_page as usize {
                break;
            }
            page += 1;
        }

        info!(model_id, count = all.len(), "fetched all CMS items");
        Ok(all)
    }

    // ── CSV export ───────────────────────────────────────────────────

    /// Fetch the bulk CSV export, preserving the CMS column order.
    pub async fn fetch_csv(&self, model_id: &str) -> Result<String, SourceError> {
        let url = self.url(&format!("{model_id}.csv"))?;
        info!(%url, "fetching CSV export");

        with_retry(&self.retry, "fetch_csv", || async {
            let resp = self
                .http
                .get(url.clone())
                .header(ACCEPT, "text/csv")
                .send()
                .await?;

            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Err(SourceError::CsvNotFound {
                    model_id: model_id.to_owned(),
                });
            }
            let resp = classify_status(resp, &format!("{model_id}.csv"))?;
            Ok(resp.text().await?)
        })
        .await
    }

    // ── Connectivity ─────────────────────────────────────────────────

    /// Lightweight probe: any response below 500 counts as reachable.
    pub async fn test_connection(&self) -> bool {
        match self.http.get(self.base_url.clone()).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(e) => {
                warn!(error = %e, "CMS connection test failed");
                false
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Ensure the base URL ends with `/` so relative joins append.
fn normalize_base_url(raw: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(raw.trim())?;
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    Ok(url)
}

fn classify_status(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    match status.as_u16() {
        401 => Err(SourceError::Unauthorized),
        403 => Err(SourceError::Forbidden),
        404 => Err(SourceError::NotFound {
            endpoint: endpoint.to_owned(),
        }),
        code if code >= 500 => Err(SourceError::Server { status: code }),
        code if code >= 400 => Err(SourceError::Http {
            status: code,
            message: status.canonical_reason().unwrap_or("request failed").to_owned(),
        }),
        _ => Ok(resp),
    }
}
