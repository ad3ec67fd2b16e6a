use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::models::{FilterOptions, Paginated};
use crate::retry::with_timeout;

const ERROR_BODY_PREVIEW_LEN: usize = 200;
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub default_headers: Vec<(String, String)>,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for ApiClientOptions {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            timeout: config.request_timeout,
            default_headers: config.default_headers.clone(),
        }
    }
}

/// Typed client for the dashboard HTTP API.
///
/// Each call is a single attempt: no retries and no caching. Clones share
/// the underlying connection pool.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    default_headers: HeaderMap,
}

impl ApiClient {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_options(ApiClientOptions::default())
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, ApiError> {
        Self::with_options(ApiClientOptions::from(config))
    }

    pub fn with_options(options: ApiClientOptions) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(options.timeout)
            .build()
            .map_err(ApiError::Transport)?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &options.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::InvalidHeader(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| ApiError::InvalidHeader(name.to_string()))?;
            default_headers.append(name, value);
        }

        Ok(Self {
            http,
            base_url: options.base_url.trim_end().to_string(),
            timeout: options.timeout,
            default_headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(ApiRequest::get(path)).await
    }

    /// GET with pagination/sorting filters appended as a query string.
    pub async fn get_with_filters<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &FilterOptions,
    ) -> Result<Paginated<T>, ApiError> {
        let path = match filter_query(filters) {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(ApiRequest::post(path, body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(ApiRequest::put(path, body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Performs one request and decodes the outcome.
    ///
    /// The whole transfer, including reading the body, is raced against the
    /// configured timeout. When the timer wins the transfer is dropped and
    /// the call fails with [`ApiError::Timeout`].
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let url = self.endpoint(&request.path);
        debug!(event = "api_request", method = %request.method, url = %url);

        match with_timeout(self.timeout, self.execute(&url, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    event = "api_request_timeout",
                    url = %url,
                    timeout_ms = self.timeout.as_millis() as u64
                );
                Err(ApiError::Timeout(self.timeout))
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        let headers = merge_headers(&self.default_headers, request.headers);
        let mut builder = self.http.request(request.method, url).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        debug!(event = "api_response", status = status.as_u16(), url = %url);

        if status == StatusCode::NO_CONTENT {
            return decode_no_content(status);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(ApiError::Transport)?;

        let result = classify_response(status, &content_type, &body);
        if let Err(err) = &result {
            warn!(event = "api_response_rejected", url = %url, error = %err);
        }
        result
    }
}

/// One outbound call: method, path relative to the base URL, optional JSON
/// body and extra headers.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Vec<u8>>,
    headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::POST, path).with_json(body)
    }

    pub fn put<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> Result<Self, ApiError> {
        Self::new(Method::PUT, path).with_json(body)
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_vec(body).map_err(ApiError::Encode)?);
        Ok(self)
    }

    /// Adds a header for this call only. It replaces any client default of
    /// the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("expected JSON but got {content_type:?}, status {status}")]
    UnexpectedContentType {
        status: StatusCode,
        content_type: String,
        preview: String,
    },

    #[error("http status {status}")]
    HttpError { status: StatusCode },

    #[error("invalid JSON response, status {status}: {source}")]
    InvalidResponseBody {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("failed to encode request body: {0}")]
    Encode(serde_json::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl ApiError {
    /// Response status carried by the error, when a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnexpectedContentType { status, .. }
            | Self::HttpError { status }
            | Self::InvalidResponseBody { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            Self::Timeout(_) | Self::Encode(_) | Self::InvalidHeader(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Builds the query string for list filters in the order
/// `page, limit, sortBy, order`, skipping unset fields.
pub fn filter_query(filters: &FilterOptions) -> Option<String> {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;

    if let Some(page) = filters.page {
        query.append_pair("page", &page.to_string());
        any = true;
    }
    if let Some(limit) = filters.limit {
        query.append_pair("limit", &limit.to_string());
        any = true;
    }
    if let Some(sort_by) = filters.sort_by.as_deref() {
        query.append_pair("sortBy", sort_by);
        any = true;
    }
    if let Some(order) = filters.order {
        query.append_pair("order", order.as_str());
        any = true;
    }

    any.then(|| query.finish())
}

fn merge_headers(defaults: &HeaderMap, per_call: HeaderMap) -> HeaderMap {
    let mut headers = defaults.clone();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    for name in per_call.keys() {
        headers.remove(name);
    }
    for (name, value) in per_call.iter() {
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn decode_no_content<T: DeserializeOwned>(status: StatusCode) -> Result<T, ApiError> {
    serde_json::from_value(Value::Null)
        .map_err(|source| ApiError::InvalidResponseBody { status, source })
}

/// Classifies a non-204 response: content type first, then status, then
/// JSON decoding.
fn classify_response<T: DeserializeOwned>(
    status: StatusCode,
    content_type: &str,
    body: &str,
) -> Result<T, ApiError> {
    if !is_json_content_type(content_type) {
        return Err(ApiError::UnexpectedContentType {
            status,
            content_type: content_type.to_string(),
            preview: body_preview(body),
        });
    }

    if !status.is_success() {
        return Err(ApiError::HttpError { status });
    }

    serde_json::from_str(body).map_err(|source| ApiError::InvalidResponseBody { status, source })
}

fn is_json_content_type(content_type: &str) -> bool {
    content_type
        .to_ascii_lowercase()
        .contains(JSON_CONTENT_TYPE)
}

fn body_preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW_LEN).collect()
}
