//! Contains the request executor and its HTTP implementation.
//!
//! Every iteration is turned into exactly one [`Request`], which an [`Executor`] issues against
//! the target store. Executors never retry: a failed request is a data point of the load test,
//! reported as an [`Outcome`], and not an error to recover from.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Method, header};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{ConfigSecret, Remote};
use crate::iteration::IterationContext;
use crate::mix::OperationKind;

/// URL path templates of the target store, relative to the remote URL.
///
/// The placeholders `{id}`, `{rev}` and `{keyword}` are replaced with the record identifier, its
/// version token, and the searched keyword respectively. Values are percent-encoded so that only
/// RFC 3986 unreserved characters appear literally. An identifier containing `/`, `?` or `#`
/// therefore stays within its path segment.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Endpoints {
    /// Fetches a document by id.
    pub by_id: String,
    /// Queries documents by keyword.
    pub by_keyword: String,
    /// Creates a new document.
    pub create: String,
    /// Replaces an existing document.
    pub update: String,
    /// Deletes an existing document.
    pub delete: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            by_id: "/wiki_articles/{id}".into(),
            by_keyword: "/wiki_articles/_design/wiki_articles_by_keyword/_view/wiki_articles_by_keyword?key=%22{keyword}%22&limit=10&stable=false&update=lazy".into(),
            create: "/wiki_articles".into(),
            update: "/wiki_articles/{id}".into(),
            delete: "/wiki_articles/{id}?rev={rev}".into(),
        }
    }
}

/// Everything except `A-Z a-z 0-9 - . _ ~` is encoded.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, ENCODE_SET).to_string()
}

fn render(template: &str, ctx: &IterationContext) -> String {
    let mut path = template.to_owned();
    if let Some(record) = &ctx.record {
        path = path
            .replace("{id}", &encode(&record.id))
            .replace("{rev}", &encode(&record.version_token));
    }
    if let Some(keyword) = &ctx.keyword {
        path = path.replace("{keyword}", &encode(keyword));
    }
    path
}

/// A single request against the target store.
#[derive(Clone, Debug)]
pub struct Request {
    /// The operation this request performs.
    pub kind: OperationKind,
    /// The HTTP method.
    pub method: Method,
    /// The path and query, relative to the remote URL.
    pub path: String,
    /// The version token sent for conditional writes.
    pub version_token: Option<String>,
    /// The JSON document body.
    pub body: Option<Bytes>,
}

impl Request {
    /// Builds the request for a planned iteration.
    pub fn for_iteration(ctx: &IterationContext, endpoints: &Endpoints) -> Self {
        let (method, template) = match ctx.kind {
            OperationKind::ReadById => (Method::GET, &endpoints.by_id),
            OperationKind::ReadByKeyword => (Method::GET, &endpoints.by_keyword),
            OperationKind::Create => (Method::POST, &endpoints.create),
            OperationKind::Update => (Method::PUT, &endpoints.update),
            OperationKind::Delete => (Method::DELETE, &endpoints.delete),
        };

        let version_token = match ctx.kind {
            OperationKind::Update | OperationKind::Delete => {
                ctx.record.as_ref().map(|r| r.version_token.clone())
            }
            _ => None,
        };

        let body = match ctx.kind {
            OperationKind::Create | OperationKind::Update => ctx.payload.clone(),
            _ => None,
        };

        Self {
            kind: ctx.kind,
            method,
            path: render(template, ctx),
            version_token,
            body,
        }
    }

    /// The size of the request body in bytes.
    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// How a request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The target responded with this HTTP status code.
    Http(u16),
    /// The request did not complete within the timeout.
    Timeout,
    /// The request could not be sent or the response could not be read.
    Transport(String),
}

impl Status {
    /// Returns `true` for 2xx and 3xx responses.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Http(code) if (200..400).contains(code))
    }

    /// Returns `true` if the target rejected a stale version token.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Http(409 | 412))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "{code}"),
            Self::Timeout => f.write_str("timeout"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// The result of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// How the request ended.
    pub status: Status,
    /// Time from sending the request until the response body was read.
    pub duration: Duration,
}

impl Outcome {
    /// Returns `true` if the request counts towards the failure rate.
    pub fn is_failure(&self) -> bool {
        !self.status.is_success()
    }
}

/// Issues requests against the target store.
#[async_trait::async_trait]
pub trait Executor: fmt::Debug + Send + Sync + 'static {
    /// Issues the request once and reports how it ended.
    async fn execute(&self, request: Request) -> Outcome;
}

/// Issues `request`, turning requests that exceed `timeout` into [`Status::Timeout`].
pub async fn execute_with_timeout(
    executor: &dyn Executor,
    request: Request,
    timeout: Duration,
) -> Outcome {
    let start = Instant::now();
    match tokio::time::timeout(timeout, executor.execute(request)).await {
        Ok(outcome) => outcome,
        Err(_) => Outcome {
            status: Status::Timeout,
            duration: start.elapsed(),
        },
    }
}

/// An [`Executor`] that talks to the target store over HTTP.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretBox<ConfigSecret>,
    version_header: header::HeaderName,
}

impl fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &format_args!("[redacted]"))
            .field("version_header", &self.version_header)
            .finish()
    }
}

impl HttpRemote {
    /// Creates a remote for the configured target store.
    pub fn new(remote: &Remote) -> anyhow::Result<Self> {
        let version_header = header::HeaderName::from_bytes(remote.version_header.as_bytes())?;
        let client = reqwest::Client::builder()
            .timeout(remote.timeout)
            .user_agent(concat!("docload/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: remote.url.trim_end_matches('/').to_owned(),
            username: remote.username.clone(),
            password: SecretBox::new(Box::new(remote.password.expose_secret().clone())),
            version_header,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: Request) -> Result<u16, reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method, self.url(&request.path))
            .basic_auth(&self.username, Some(self.password.expose_secret().as_str()));

        if let Some(token) = request.version_token {
            builder = builder.header(self.version_header.clone(), token);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // Read the full body so the duration covers the complete response.
        response.bytes().await?;

        Ok(status)
    }
}

#[async_trait::async_trait]
impl Executor for HttpRemote {
    async fn execute(&self, request: Request) -> Outcome {
        let kind = request.kind;
        let start = Instant::now();
        let status = match self.send(request).await {
            Ok(code) => Status::Http(code),
            Err(err) if err.is_timeout() => Status::Timeout,
            Err(err) => Status::Transport(err.to_string()),
        };
        let duration = start.elapsed();

        if !status.is_success() {
            tracing::debug!(%kind, %status, ?duration, "request failed");
        }

        Outcome { status, duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RecordRef;

    fn ctx(kind: OperationKind) -> IterationContext {
        IterationContext {
            index: 0,
            kind,
            record: kind
                .needs_target()
                .then(|| RecordRef::new("doc-1", "3-abc")),
            payload: kind
                .needs_payload()
                .then(|| Bytes::from_static(br#"{"title":"x"}"#)),
            keyword: kind.needs_keyword().then(|| "taxi".to_owned()),
        }
    }

    #[test]
    fn read_by_id() {
        let request = Request::for_iteration(&ctx(OperationKind::ReadById), &Endpoints::default());
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/wiki_articles/doc-1");
        assert!(request.version_token.is_none());
        assert!(request.body.is_none());
    }

    #[test]
    fn read_by_keyword() {
        let request =
            Request::for_iteration(&ctx(OperationKind::ReadByKeyword), &Endpoints::default());
        assert_eq!(request.method, Method::GET);
        assert_eq!(
            request.path,
            "/wiki_articles/_design/wiki_articles_by_keyword/_view/wiki_articles_by_keyword?key=%22taxi%22&limit=10&stable=false&update=lazy"
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn create() {
        let request = Request::for_iteration(&ctx(OperationKind::Create), &Endpoints::default());
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/wiki_articles");
        assert!(request.version_token.is_none());
        assert_eq!(request.body_len(), 13);
    }

    #[test]
    fn update_is_conditional() {
        let request = Request::for_iteration(&ctx(OperationKind::Update), &Endpoints::default());
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.path, "/wiki_articles/doc-1");
        assert_eq!(request.version_token.as_deref(), Some("3-abc"));
        assert!(request.body.is_some());
    }

    #[test]
    fn delete_is_conditional() {
        let request = Request::for_iteration(&ctx(OperationKind::Delete), &Endpoints::default());
        assert_eq!(request.method, Method::DELETE);
        assert_eq!(request.path, "/wiki_articles/doc-1?rev=3-abc");
        assert_eq!(request.version_token.as_deref(), Some("3-abc"));
        assert!(request.body.is_none());
    }

    #[test]
    fn custom_endpoints() {
        let endpoints = Endpoints {
            by_id: "/db/docs/{id}?r={rev}".into(),
            ..Default::default()
        };
        let request = Request::for_iteration(&ctx(OperationKind::ReadById), &endpoints);
        assert_eq!(request.path, "/db/docs/doc-1?r=3-abc");
    }

    #[test]
    fn values_are_percent_encoded() {
        let mut delete = ctx(OperationKind::Delete);
        delete.record = Some(RecordRef::new("Main Page/Talk?a#b", "2-x+y"));
        let request = Request::for_iteration(&delete, &Endpoints::default());
        assert_eq!(request.path, "/wiki_articles/Main%20Page%2FTalk%3Fa%23b?rev=2-x%2By");
        assert_eq!(request.version_token.as_deref(), Some("2-x+y"));

        let mut search = ctx(OperationKind::ReadByKeyword);
        search.keyword = Some("caf\u{e9} & co".into());
        let request = Request::for_iteration(&search, &Endpoints::default());
        assert!(request.path.contains("?key=%22caf%C3%A9%20%26%20co%22&limit=10"));
    }

    #[test]
    fn status_classification() {
        assert!(Status::Http(200).is_success());
        assert!(Status::Http(304).is_success());
        assert!(!Status::Http(404).is_success());
        assert!(!Status::Http(503).is_success());
        assert!(!Status::Timeout.is_success());
        assert!(!Status::Transport("refused".into()).is_success());
        assert!(Status::Http(409).is_conflict());
        assert!(Status::Http(412).is_conflict());
        assert!(!Status::Http(500).is_conflict());
    }

    #[derive(Debug)]
    struct Hang;

    #[async_trait::async_trait]
    impl Executor for Hang {
        async fn execute(&self, _request: Request) -> Outcome {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_requests_time_out() {
        let request = Request::for_iteration(&ctx(OperationKind::ReadById), &Endpoints::default());
        let outcome = execute_with_timeout(&Hang, request, Duration::from_secs(5)).await;
        assert_eq!(outcome.status, Status::Timeout);
        assert!(outcome.is_failure());
        assert!(outcome.duration >= Duration::from_secs(5));
    }
}
