use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Minimal HTTP method enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// Query parameters. Ordered so that generated URLs are stable.
pub type Params = BTreeMap<String, String>;

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    /// Body as UTF-8 text, lossily decoded. Used for error messages.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Join `root` and `path` and append `params` as an encoded query string.
pub fn build_url(root: &str, path: &str, params: &Params) -> Result<String, url::ParseError> {
    let root = if root.ends_with('/') {
        root.to_string()
    } else {
        format!("{root}/")
    };
    let mut url = url::Url::parse(&root)?.join(path.trim_start_matches('/'))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

pub mod reqwest_transport {
    use super::*;

    use std::time::Duration as StdDuration;

    /// A real HTTP transport backed by reqwest.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn with_timeout(timeout: StdDuration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("gitlab-export/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self.client.request(method, &request.url);
            for (k, v) in request.headers {
                builder = builder.header(&k, &v);
            }

            if !request.body.is_empty() {
                builder = builder.body(request.body);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let mut headers: HttpHeaders = Vec::new();
            for (name, value) in resp.headers().iter() {
                headers.push((
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                ));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

// ---------- Mock transport (unit tests and the `test-util` feature) ----------

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory mock transport.
    ///
    /// No sockets, no loopback HTTP servers. Responses are keyed by method and
    /// full URL (query string included).
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<MockTransportInner>>,
    }

    #[derive(Default)]
    struct MockTransportInner {
        routes: HashMap<(HttpMethod, String), VecDeque<HttpResponse>>,
        requests: Vec<HttpRequest>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a response for a method + URL.
        ///
        /// If multiple responses are registered for the same key, they are returned
        /// in FIFO order.
        pub fn push_response(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            response: HttpResponse,
        ) {
            let mut inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");
            inner
                .routes
                .entry((method, url.into()))
                .or_default()
                .push_back(response);
        }

        /// Register a JSON response with optional `X-Next-Page` cursor.
        pub fn push_json(
            &self,
            method: HttpMethod,
            url: impl Into<String>,
            status: u16,
            body: serde_json::Value,
            next_page: Option<&str>,
        ) {
            let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
            if let Some(next) = next_page {
                headers.push(("X-Next-Page".to_string(), next.to_string()));
            }
            self.push_response(
                method,
                url,
                HttpResponse {
                    status,
                    headers,
                    body: body.to_string().into_bytes(),
                },
            );
        }

        #[must_use]
        pub fn requests(&self) -> Vec<HttpRequest> {
            let inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");
            inner.requests.clone()
        }

        /// Number of requests sent to exactly this method + URL.
        #[must_use]
        pub fn count(&self, method: HttpMethod, url: &str) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.method == method && r.url == url)
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut inner = self
                .inner
                .lock()
                .expect("mock transport lock should not be poisoned");

            let key = (request.method, request.url.clone());
            inner.requests.push(request);

            match inner.routes.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(resp) => Ok(resp),
                None => Err(HttpError::NoMockResponse {
                    method: key.0.as_str().to_string(),
                    url: key.1,
                }),
            }
        }
    }
}
