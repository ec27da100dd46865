//! # HTTP Retrieval Utilities
//!
//! A small asynchronous API client around `reqwest`: a base URL that relative
//! paths are joined onto, an optional bearer token, JSON bodies and a
//! standardized [`ApiResponse`]. Long-lived responses (streaming endpoints)
//! are handed back raw through [`ApiClient::open`].

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by [`ApiClient`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// The base URL or a joined path is not a valid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The request could not be sent or its body could not be read.
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A body could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client rooted at `base_url`. A trailing slash is added when
    /// missing so that relative paths join below it.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, HttpError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            inner: reqwest::Client::new(),
            base_url: Url::parse(&base)?,
            auth_token,
        })
    }

    /// The URL relative paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request and deserializes a successful JSON body into `T`.
    ///
    /// Non-2xx answers are not errors: they come back with `success == false`
    /// and the raw body in `error_body`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self.inner.request(method, self.base_url.join(path)?);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(b)?;
            req = req
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(json_body);
        }

        let response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }

    /// Issues a GET and returns the response without reading the body, for
    /// endpoints that stream.
    pub async fn open(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, HttpError> {
        let mut req = self.inner.get(self.base_url.join(path)?);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(req.send().await?)
    }
}
