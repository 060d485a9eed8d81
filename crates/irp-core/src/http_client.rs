use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// HTTP methods used by the platform endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    /// Raw API key sent as the `Authorization` header value.
    ApiKey(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::ApiKey(key) => {
                headers.insert(String::from("authorization"), key.clone());
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// HTTP request envelope handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 200_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(self, body: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Value of a query parameter, if present.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Request body parsed as JSON, `Value::Null` when absent or invalid.
    pub fn json_body(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
            .unwrap_or(Value::Null)
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpErrorKind {
    Timeout,
    Connect,
    Other,
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    kind: HttpErrorKind,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: HttpErrorKind::Other,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: HttpErrorKind::Timeout,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: HttpErrorKind::Connect,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == HttpErrorKind::Timeout
    }

    pub fn is_connect(&self) -> bool {
        self.kind == HttpErrorKind::Connect
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Boxed future returned by [`HttpClient::execute`].
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Boxed future returned by [`HttpClient::execute_streaming`].
pub type StreamingFuture<'a> =
    Pin<Box<dyn Future<Output = Result<StreamingResponse, HttpError>> + Send + 'a>>;

/// Boxed future yielding the next body chunk, `None` once the body is done.
pub type ChunkFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Bytes>, HttpError>> + Send + 'a>>;

/// Response body read chunk by chunk.
pub trait BodyStream: Send {
    fn next_chunk(&mut self) -> ChunkFuture<'_>;
}

/// Response whose body is still on the wire.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Box<dyn BodyStream>,
}

impl StreamingResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport contract: execute one request, no retries.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;

    /// Like [`execute`](Self::execute), but the body is handed back unread.
    fn execute_streaming<'a>(&'a self, request: HttpRequest) -> StreamingFuture<'a>;
}

/// Production HTTP client using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("irp-core/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response, HttpError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = builder.timeout(std::time::Duration::from_millis(request.timeout_ms));
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::timeout(format!("request timeout: {e}"))
            } else if e.is_connect() {
                HttpError::connect(format!("connection failed: {e}"))
            } else {
                HttpError::new(format!("request failed: {e}"))
            }
        })
    }
}

fn response_headers(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned()))
        })
        .collect()
}

fn body_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::timeout(format!("timed out reading response body: {e}"))
    } else {
        HttpError::new(format!("failed to read response body: {e}"))
    }
}

struct ReqwestBody(reqwest::Response);

impl BodyStream for ReqwestBody {
    fn next_chunk(&mut self) -> ChunkFuture<'_> {
        Box::pin(async move { self.0.chunk().await.map_err(body_error) })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let response = self.send(request).await?;
            let status = response.status().as_u16();
            let headers = response_headers(&response);
            let body = response.bytes().await.map_err(body_error)?;

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        })
    }

    fn execute_streaming<'a>(&'a self, request: HttpRequest) -> StreamingFuture<'a> {
        Box::pin(async move {
            let response = self.send(request).await?;
            Ok(StreamingResponse {
                status: response.status().as_u16(),
                headers: response_headers(&response),
                body: Box::new(ReqwestBody(response)),
            })
        })
    }
}

#[derive(Debug)]
enum Scripted {
    Whole(Result<HttpResponse, HttpError>),
    Chunked {
        status: u16,
        chunks: Vec<Result<Vec<u8>, HttpError>>,
    },
}

struct ScriptedBody(VecDeque<Result<Vec<u8>, HttpError>>);

impl BodyStream for ScriptedBody {
    fn next_chunk(&mut self) -> ChunkFuture<'_> {
        let next = self.0.pop_front().transpose().map(|chunk| chunk.map(Bytes::from));
        Box::pin(std::future::ready(next))
    }
}

/// Offline transport that replays queued responses in order and records
/// every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) -> &Self {
        self.lock_responses().push_back(Scripted::Whole(Ok(response)));
        self
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(HttpResponse::json(status, &body))
    }

    /// Queue an empty-bodied `status` response carrying a `Location` header.
    pub fn push_location(&self, status: u16, location: impl Into<String>) -> &Self {
        self.push(HttpResponse::new(status, Vec::new()).with_header("location", location))
    }

    pub fn push_error(&self, error: HttpError) -> &Self {
        self.lock_responses().push_back(Scripted::Whole(Err(error)));
        self
    }

    /// Queue a response whose body arrives as `chunks`. An `Err` chunk
    /// breaks the body off at that point.
    pub fn push_chunked(&self, status: u16, chunks: Vec<Result<Vec<u8>, HttpError>>) -> &Self {
        self.lock_responses()
            .push_back(Scripted::Chunked { status, chunks });
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_responses().len()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_for(&self, request: HttpRequest) -> Result<Scripted, HttpError> {
        let label = format!("{} {}", request.method, request.url);
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        self.lock_responses()
            .pop_front()
            .ok_or_else(|| HttpError::new(format!("no scripted response for {label}")))
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        let response = self.next_for(request).and_then(|next| match next {
            Scripted::Whole(response) => response,
            Scripted::Chunked { status, chunks } => {
                let mut body = Vec::new();
                for chunk in chunks {
                    body.extend(chunk?);
                }
                Ok(HttpResponse::new(status, body))
            }
        });
        Box::pin(std::future::ready(response))
    }

    fn execute_streaming<'a>(&'a self, request: HttpRequest) -> StreamingFuture<'a> {
        let response = self.next_for(request).and_then(|next| match next {
            Scripted::Whole(response) => response.map(|response| StreamingResponse {
                status: response.status,
                headers: response.headers,
                body: Box::new(ScriptedBody(VecDeque::from([Ok(response.body)]))),
            }),
            Scripted::Chunked { status, chunks } => Ok(StreamingResponse {
                status,
                headers: BTreeMap::new(),
                body: Box::new(ScriptedBody(chunks.into())),
            }),
        });
        Box::pin(std::future::ready(response))
    }
}
