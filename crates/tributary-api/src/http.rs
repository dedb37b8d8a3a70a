use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use tributary_types::{
    ComputeResource, CreateInstance, Error, FeedId, FileRecord, InstanceId, InstanceRecord,
    ParameterValue, PluginId, PluginParameter, Result,
};

use crate::api::{FeedApi, Page};

// ---------------------------------------------------------------------------
// HttpFeedApi
// ---------------------------------------------------------------------------

/// reqwest-backed implementation of [`FeedApi`].
///
/// Walks `next` links until a collection is drained. Transport-level retry
/// and timeout policy live in the `reqwest::Client` the caller supplies.
#[derive(Debug, Clone)]
pub struct HttpFeedApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpFeedApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Build from `TRIBUTARY_URL` and (optionally) `TRIBUTARY_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TRIBUTARY_URL")
            .map_err(|_| Error::Other("TRIBUTARY_URL is not set".into()))?;
        let mut api = Self::new(base_url);
        if let Ok(token) = std::env::var("TRIBUTARY_TOKEN") {
            api = api.with_token(token);
        }
        Ok(api)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!(%url, "GET");
        let resp = self
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport {
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(fail_from(resp).await);
        }
        resp.json::<T>().await.map_err(|e| Error::Transport {
            message: e.to_string(),
        })
    }

    /// Drain a paged collection, following `next` links to exhaustion.
    async fn collect_pages<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut url = Some(first);
        while let Some(current) = url {
            let page: Page<T> = self.get_json(&current).await?;
            items.extend(page.results);
            url = page.next;
        }
        Ok(items)
    }
}

#[async_trait]
impl FeedApi for HttpFeedApi {
    async fn list_instances(&self, feed_id: FeedId) -> Result<Vec<InstanceRecord>> {
        self.collect_pages(self.endpoint(&format!("feeds/{feed_id}/instances")))
            .await
    }

    async fn list_files(&self, instance_id: InstanceId) -> Result<Vec<FileRecord>> {
        self.collect_pages(self.endpoint(&format!("instances/{instance_id}/files")))
            .await
    }

    async fn instance_parameters(&self, instance_id: InstanceId) -> Result<Vec<ParameterValue>> {
        self.collect_pages(self.endpoint(&format!("instances/{instance_id}/parameters")))
            .await
    }

    async fn plugin_parameters(&self, plugin_id: PluginId) -> Result<Vec<PluginParameter>> {
        self.collect_pages(self.endpoint(&format!("plugins/{plugin_id}/parameters")))
            .await
    }

    async fn compute_resources(&self, plugin_id: PluginId) -> Result<Vec<ComputeResource>> {
        self.collect_pages(self.endpoint(&format!("plugins/{plugin_id}/computeresources")))
            .await
    }

    async fn create_instance(
        &self,
        plugin_id: PluginId,
        request: &CreateInstance,
    ) -> Result<InstanceRecord> {
        let url = self.endpoint(&format!("plugins/{plugin_id}/instances"));
        tracing::info!(
            plugin = plugin_id,
            previous = ?request.previous_id,
            compute = ?request.compute_resource_name,
            "creating instance"
        );

        let mut req = self.client.post(&url).json(&request.to_payload());
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| Error::Transport {
            message: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            if status == 400 {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_create_failure(status, &body));
            }
            return Err(fail_from(resp).await);
        }
        resp.json::<InstanceRecord>()
            .await
            .map_err(|e| Error::Transport {
                message: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Failure mapping
// ---------------------------------------------------------------------------

async fn fail_from(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry_after_ms = parse_retry_after(
            resp.headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        return Error::RateLimited { retry_after_ms };
    }
    let body = resp.text().await.unwrap_or_default();
    classify_status(status, &body)
}

fn classify_status(status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::Auth,
        s => Error::Api {
            status: s,
            message: snippet(body),
            retryable: s >= 500,
        },
    }
}

/// Creation rejections carry a structured validation body; preserve the
/// per-field messages instead of flattening them into one string.
fn classify_create_failure(status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct RejectionBody {
        #[serde(default)]
        message: String,
        #[serde(default)]
        errors: HashMap<String, Vec<String>>,
    }

    match serde_json::from_str::<RejectionBody>(body) {
        Ok(rejection) if !rejection.errors.is_empty() || !rejection.message.is_empty() => {
            let message = if rejection.message.is_empty() {
                "validation failed".to_string()
            } else {
                rejection.message
            };
            let fields = rejection
                .errors
                .into_iter()
                .map(|(field, messages)| (field, messages.join("; ")))
                .collect();
            Error::Rejected { message, fields }
        }
        _ => classify_status(status, body),
    }
}

fn parse_retry_after(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
        .unwrap_or(1000)
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let api = HttpFeedApi::new("https://backend.test/api/");
        assert_eq!(
            api.endpoint("/feeds/3/instances"),
            "https://backend.test/api/feeds/3/instances"
        );
        assert_eq!(
            api.endpoint("plugins/9/parameters"),
            "https://backend.test/api/plugins/9/parameters"
        );
    }

    #[test]
    fn classify_status_auth() {
        assert!(matches!(classify_status(401, ""), Error::Auth));
        assert!(matches!(classify_status(403, ""), Error::Auth));
    }

    #[test]
    fn classify_status_server_errors_are_retryable() {
        let err = classify_status(503, "temporarily unavailable");
        match err {
            Error::Api {
                status,
                retryable,
                ref message,
            } => {
                assert_eq!(status, 503);
                assert!(retryable);
                assert_eq!(message, "temporarily unavailable");
            }
            other => panic!("expected Api error, got: {other:?}"),
        }
        assert!(!classify_status(404, "not found").is_retryable());
    }

    #[test]
    fn classify_create_failure_preserves_field_errors() {
        let body = r#"{
            "message": "invalid parameters",
            "errors": {"threshold": ["must be positive", "must be finite"]}
        }"#;
        match classify_create_failure(400, body) {
            Error::Rejected { message, fields } => {
                assert_eq!(message, "invalid parameters");
                assert_eq!(
                    fields.get("threshold").map(String::as_str),
                    Some("must be positive; must be finite")
                );
            }
            other => panic!("expected Rejected, got: {other:?}"),
        }
    }

    #[test]
    fn classify_create_failure_falls_back_on_unstructured_body() {
        let err = classify_create_failure(400, "not json at all");
        assert!(matches!(err, Error::Api { status: 400, .. }));
    }

    #[test]
    fn retry_after_header_parsing() {
        assert_eq!(parse_retry_after(Some("2")), 2000);
        assert_eq!(parse_retry_after(Some("nonsense")), 1000);
        assert_eq!(parse_retry_after(None), 1000);
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = snippet(&long);
        assert!(s.len() < 500);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }
}
