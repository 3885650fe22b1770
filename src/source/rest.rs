// ABOUTME: HTTP fetcher for REST endpoints that return JSON row arrays
// ABOUTME: Supports GET/POST, optional JSON pointer to the rows, and static headers

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;

use super::{rows_from_values, Fetcher};
use crate::store::Row;

/// Fetches snapshots from a REST API.
///
/// Methods: `query` and `get` issue a GET, `post` issues a POST with
/// `args[1]` as the JSON body. `args[0]` is a path joined onto the base URL
/// (empty or missing means the base URL itself).
pub struct RestSource {
    client: Client,
    base_url: url::Url,
    rows_pointer: Option<String>,
    headers: HashMap<String, String>,
}

impl RestSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            url::Url::parse(base_url).with_context(|| format!("Invalid REST base URL: {}", base_url))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url,
            rows_pointer: None,
            headers: HashMap::new(),
        })
    }

    /// JSON pointer (RFC 6901) locating the row array inside the response,
    /// e.g. `/data/items`.
    pub fn rows_pointer(mut self, pointer: Option<String>) -> Self {
        self.rows_pointer = pointer;
        self
    }

    /// Header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Resolve the request URL for a path argument.
    pub fn endpoint(&self, path: Option<&Value>) -> Result<url::Url> {
        match path {
            None | Some(Value::Null) => Ok(self.base_url.clone()),
            Some(Value::String(p)) if p.is_empty() => Ok(self.base_url.clone()),
            Some(Value::String(p)) => self
                .base_url
                .join(p)
                .with_context(|| format!("Invalid REST path: {}", p)),
            Some(other) => bail!("REST path argument must be a string, got {}", other),
        }
    }

    /// Pull the row array out of a decoded response body.
    pub fn extract_rows(&self, body: Value) -> Result<Vec<Row>> {
        let rows = match &self.rows_pointer {
            Some(pointer) => body
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| anyhow!("REST response has no value at {}", pointer))?,
            None => body,
        };
        match rows {
            Value::Array(items) => rows_from_values(items),
            other => bail!("REST response rows are not an array: {}", summarize(&other)),
        }
    }
}

impl Fetcher for RestSource {
    fn fetch<'a>(&'a self, method: &'a str, args: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let url = self.endpoint(args.first())?;
            let mut request = match method {
                "query" | "get" => self.client.get(url.clone()),
                "post" => {
                    let body = args.get(1).cloned().unwrap_or(Value::Null);
                    self.client.post(url.clone()).json(&body)
                }
                other => bail!("REST source does not support method '{}'", other),
            };
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Failed to reach {}", url))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Request to {} failed with status {}: {}", url, status, body);
            }

            let body: Value = response
                .json()
                .await
                .with_context(|| format!("Failed to parse JSON from {}", url))?;
            self.extract_rows(body)
        })
    }
}

fn summarize(value: &Value) -> String {
    let text = value.to_string();
    if text.len() > 80 {
        let cut = (0..=80).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> RestSource {
        RestSource::new("https://api.example.com/v1/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(RestSource::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let src = source();
        assert_eq!(
            src.endpoint(Some(&json!("users"))).unwrap().as_str(),
            "https://api.example.com/v1/users"
        );
        assert_eq!(
            src.endpoint(None).unwrap().as_str(),
            "https://api.example.com/v1/"
        );
        assert!(src.endpoint(Some(&json!(5))).is_err());
    }

    #[test]
    fn test_extract_rows_top_level_array() {
        let rows = source()
            .extract_rows(json!([{"id": 1}, {"id": 2}]))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_extract_rows_with_pointer() {
        let src = source().rows_pointer(Some("/data/items".to_string()));
        let rows = src
            .extract_rows(json!({"data": {"items": [{"id": "x"}]}}))
            .unwrap();
        assert_eq!(rows[0]["id"], json!("x"));
        assert!(src.extract_rows(json!({"data": {}})).is_err());
    }

    #[test]
    fn test_extract_rows_rejects_objects() {
        assert!(source().extract_rows(json!({"id": 1})).is_err());
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let err = source().fetch("delete", &[]).await.unwrap_err();
        assert!(err.to_string().contains("does not support"));
    }
}
