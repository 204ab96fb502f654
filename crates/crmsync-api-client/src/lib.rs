//! HTTP client for the upstream wrapper API.
//!
//! Every call carries the caller's bearer token. List resources are paginated with
//! `page`/`limit` and fetched until exhausted. Failures come back as [`AppError`]
//! values that classify into the sync error taxonomy: non-2xx answers keep their
//! status, transport failures carry a network error code, `success: false`
//! envelopes are upstream rejections.

pub mod api;

use std::error::Error as StdError;
use std::time::Duration;

use anyhow::{Context, Result};
use crmsync_core::constants::{DEFAULT_PAGE_SIZE, MAX_PAGES, MAX_PAGE_SIZE, WRAPPER_API_PREFIX};
use crmsync_core::models::{Pagination, WrapperEnvelope};
use crmsync_core::{AppError, SyncConfig};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

pub use api::WrapperApi;

/// HTTP client for the wrapper API.
#[derive(Clone, Debug)]
pub struct WrapperClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl WrapperClient {
    pub fn new(base_url: &str, timeout: Duration, page_size: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            &config.wrapper_api_url,
            config.wrapper_timeout(),
            config.wrapper_page_size,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// `{base}/api/wrapper/tenants/{tenant_id}{suffix}`
    pub fn tenant_url(&self, tenant_id: &str, suffix: &str) -> String {
        format!(
            "{}{}/{}{}",
            self.base_url, WRAPPER_API_PREFIX, tenant_id, suffix
        )
    }

    /// GET one envelope. Non-2xx, `success: false` and undecodable bodies are errors.
    pub async fn get_envelope<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<WrapperEnvelope<T>, AppError> {
        let mut request = self.client.get(url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::UpstreamStatus {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        let envelope: WrapperEnvelope<T> = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(AppError::UpstreamRejected {
                resource: resource.to_string(),
                message: envelope
                    .error
                    .or(envelope.message)
                    .unwrap_or_else(|| "success: false".to_string()),
            });
        }

        Ok(envelope)
    }

    /// Fetch a single object resource.
    pub async fn fetch_one<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
        token: &str,
    ) -> Result<T, AppError> {
        self.get_envelope::<T>(url, resource, token, &[])
            .await?
            .data
            .ok_or_else(|| AppError::UpstreamRejected {
                resource: resource.to_string(),
                message: "response has no data".to_string(),
            })
    }

    /// Fetch every page of a list resource. One undecodable row fails the whole fetch.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
        token: &str,
    ) -> Result<Vec<T>, AppError> {
        self.paginate(url, resource, token, |rows, _| {
            rows.into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()
                .map_err(AppError::from)
        })
        .await
    }

    /// Fetch every page of a list resource, dropping rows that do not decode.
    pub async fn fetch_all_lenient<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
        token: &str,
    ) -> Result<Vec<T>, AppError> {
        self.paginate(url, resource, token, |rows, page| {
            Ok(decode_rows(resource, page, rows))
        })
        .await
    }

    async fn paginate<T, F>(
        &self,
        url: &str,
        resource: &str,
        token: &str,
        decode: F,
    ) -> Result<Vec<T>, AppError>
    where
        F: Fn(Vec<JsonValue>, u32) -> Result<Vec<T>, AppError>,
    {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let query = [
                ("page", page.to_string()),
                ("limit", self.page_size.to_string()),
            ];
            let envelope = self
                .get_envelope::<Vec<JsonValue>>(url, resource, token, &query)
                .await?;
            let rows = envelope.data.unwrap_or_default();
            let fetched = rows.len();
            items.extend(decode(rows, page)?);

            if !has_next_page(envelope.pagination, page, fetched, self.page_size) {
                break;
            }
            if page >= MAX_PAGES {
                tracing::warn!(resource, pages = page, "Pagination limit reached, stopping");
                break;
            }
            page += 1;
        }

        tracing::debug!(resource, count = items.len(), pages = page, "Fetched resource");
        Ok(items)
    }
}

fn decode_rows<T: DeserializeOwned>(resource: &str, page: u32, rows: Vec<JsonValue>) -> Vec<T> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value(row) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(resource, page, index, error = %e, "Skipping undecodable row");
                None
            }
        })
        .collect()
}

impl Default for WrapperClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Without a pagination block, a full page means there may be more.
fn has_next_page(pagination: Option<Pagination>, page: u32, fetched: usize, limit: u32) -> bool {
    if fetched == 0 {
        return false;
    }
    match pagination {
        Some(p) => page < p.total_pages,
        None => fetched >= limit as usize,
    }
}

/// Map a transport failure to a network error carrying the closest errno-style code.
fn transport_error(err: reqwest::Error) -> AppError {
    let code = if err.is_timeout() {
        Some("ETIMEDOUT")
    } else {
        io_code(&err).or_else(|| err.is_connect().then_some("ECONNREFUSED"))
    };
    AppError::Network {
        code: code.map(str::to_string),
        message: err.to_string(),
    }
}

fn io_code(err: &reqwest::Error) -> Option<&'static str> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                std::io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    Some("ECONNRESET")
                }
                std::io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
                _ => None,
            };
        }
        if inner.to_string().contains("dns error") {
            return Some("ENOTFOUND");
        }
        source = inner.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pagination(page: u32, total_pages: u32) -> Option<Pagination> {
        Some(Pagination {
            page,
            limit: 2,
            total: 4,
            total_pages,
        })
    }

    #[test]
    fn test_has_next_page() {
        assert!(has_next_page(pagination(1, 2), 1, 2, 2));
        assert!(!has_next_page(pagination(2, 2), 2, 2, 2));
        assert!(!has_next_page(pagination(1, 5), 1, 0, 2));
        assert!(has_next_page(None, 1, 2, 2));
        assert!(!has_next_page(None, 1, 1, 2));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let client = WrapperClient::new("http://x/", Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.page_size(), 1);
        let client = WrapperClient::new("http://x", Duration::from_secs(1), 10_000).unwrap();
        assert_eq!(client.page_size(), MAX_PAGE_SIZE);
        assert_eq!(
            client.tenant_url("t1", "/roles"),
            "http://x/api/wrapper/tenants/t1/roles"
        );
    }
}
