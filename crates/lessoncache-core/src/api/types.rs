use std::collections::BTreeMap;

use reqwest::{Method, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;

/// An outbound request as seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse `url` and build a GET request for it.
    pub fn get_str(url: &str) -> Result<Self, ApiError> {
        let url = Url::parse(url).map_err(|e| ApiError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Cache key: method plus the absolute URL, fragment dropped.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    pub fn is_http(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }
}

/// How the response relates to the shell's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same origin as the application shell.
    Basic,
    /// Cross origin, from an allowlisted host or with CORS headers.
    Cors,
    /// Cross origin without permission; body must not be persisted.
    Opaque,
}

impl ResponseType {
    pub fn is_persistable(self) -> bool {
        matches!(self, ResponseType::Basic | ResponseType::Cors)
    }
}

/// A fully-read HTTP response. Cloning duplicates the body, so a cached copy
/// never shares state with the one handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only exact 200s of a permitted response type go into the shell partition.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type.is_persistable()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// One element of the bulk-lessons response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkQuestion {
    #[serde(rename = "skillId")]
    pub skill_id: String,
    #[serde(rename = "questionData")]
    pub question_data: Value,
}
