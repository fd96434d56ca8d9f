//! HTTP client for the lesson content API and the application shell origin.
//!
//! `ApiClient::fetch` behaves like a browser fetch: any response the server
//! sends back, including 4xx/5xx, is returned as an [`HttpResponse`]; only
//! transport failures are errors. The typed helpers on top of it treat
//! non-2xx statuses as errors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;

use super::types::{BulkQuestion, HttpResponse, Request, ResponseType};
use super::ApiError;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    /// API base without trailing slash, e.g. `https://example.org/api`.
    base: Arc<str>,
    origin: Url,
    cross_origin_allowlist: Arc<[String]>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let base = config
            .api_base()
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let mut origin = base.clone();
        origin.set_path("/");
        origin.set_query(None);

        Ok(Self {
            client,
            base: base.as_str().trim_end_matches('/').into(),
            origin,
            cross_origin_allowlist: config.cross_origin_allowlist.clone().into(),
        })
    }

    /// Path relative to the API base, e.g. `/math/curriculum`.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base, path);
        Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// Path relative to the shell origin, e.g. `/index.html`.
    pub fn asset_url(&self, path: &str) -> Result<Url, ApiError> {
        self.origin
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    /// Path component of the API base, used to make route matching relative.
    pub fn base_path(&self) -> String {
        Url::parse(&self.base)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    fn response_type(&self, url: &Url, headers: &header::HeaderMap) -> ResponseType {
        if url.origin() == self.origin.origin() {
            return ResponseType::Basic;
        }
        let allowlisted = url
            .host_str()
            .map(|host| self.cross_origin_allowlist.iter().any(|h| h == host))
            .unwrap_or(false);
        if allowlisted || headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }

    /// Send `request` and read the whole body.
    pub async fn fetch(&self, request: &Request) -> Result<HttpResponse, ApiError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let response_type = self.response_type(&final_url, response.headers());
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %request.url, status, ?response_type, bytes = body.len(), "Fetched");

        Ok(HttpResponse {
            url: final_url.to_string(),
            status,
            headers,
            body,
            response_type,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let response = self.fetch(&Request::get(url.clone())).await?;
        if !response.is_success() {
            let status = reqwest::StatusCode::from_u16(response.status)
                .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
            return Err(ApiError::from_status(status, &response.text()));
        }
        response.json().map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    // ===== Content Endpoints =====

    /// Published curriculum listing.
    pub async fn fetch_curriculum(&self) -> Result<Value, ApiError> {
        self.get(self.endpoint("/math/curriculum")?).await
    }

    /// Bulk batch of questions for every skill of a level.
    pub async fn fetch_bulk_lessons(
        &self,
        level_id: &str,
        questions_per_skill: usize,
    ) -> Result<Vec<BulkQuestion>, ApiError> {
        let mut url = self.endpoint(&format!("/math/bulk-lessons/{}", level_id))?;
        url.query_pairs_mut()
            .append_pair("questions_per_skill", &questions_per_skill.to_string());
        self.get(url).await
    }

    /// Placement test questions for a level, returned verbatim.
    pub async fn fetch_placement_test(&self, level_id: &str) -> Result<Vec<Value>, ApiError> {
        self.get(self.endpoint(&format!("/math/placement-test/{}", level_id))?)
            .await
    }
}
