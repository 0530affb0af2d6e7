//! Exposes an in-process document store for use in integration tests.
//!
//! ```
//! use docload_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::with_documents(100).await;
//!    let catalog = server.catalog();
//!    // write the catalog to a file and point the load test at `server.url("/")`...
//! }
//! ```
//!
//! The server implements the subset of the CouchDB API that load tests use: documents in the
//! `wiki_articles` database with revision tracking, and the keyword view. Updates and deletes
//! require the current revision, either in the `If-Match` header or the `rev` query parameter,
//! and are rejected with `409 Conflict` otherwise.

use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

const DATABASE: &str = "wiki_articles";

/// A request received by the [`TestServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    /// The HTTP method.
    pub method: Method,
    /// The request path, without the query string.
    pub path: String,
    /// The query string, if any.
    pub query: Option<String>,
    /// The value of the `If-Match` header, if sent.
    pub if_match: Option<String>,
    /// The response status.
    pub status: StatusCode,
}

#[derive(Debug)]
struct Document {
    generation: u64,
    rev: String,
    body: Value,
}

#[derive(Debug, Default)]
struct Store {
    documents: BTreeMap<String, Document>,
    sequence: u64,
    requests: Vec<RecordedRequest>,
    unavailable: bool,
}

impl Store {
    fn next_rev(&mut self, generation: u64) -> String {
        self.sequence += 1;
        format!("{generation}-{:032x}", self.sequence)
    }

    fn insert(&mut self, id: String, body: Value) -> String {
        let rev = self.next_rev(1);
        self.documents.insert(
            id,
            Document {
                generation: 1,
                rev: rev.clone(),
                body,
            },
        );
        rev
    }
}

type SharedStore = Arc<Mutex<Store>>;

fn lock(store: &SharedStore) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

/// An in-process mock document store for use in integration tests.
///
/// It listens on a random available port on localhost and keeps all documents in memory.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    store: SharedStore,
}

impl TestServer {
    /// Starts an empty server.
    pub async fn new() -> Self {
        Self::with_documents(0).await
    }

    /// Starts a server with `count` documents, named `doc-0` to `doc-{count - 1}`.
    pub async fn with_documents(count: usize) -> Self {
        let mut store = Store::default();
        for i in 0..count {
            let id = format!("doc-{i}");
            let body = json!({ "title": id, "keywords": ["taxi"] });
            store.insert(id, body);
        }
        let store = Arc::new(Mutex::new(store));

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let view = format!("/{DATABASE}/_design/{DATABASE}_by_keyword/_view/{DATABASE}_by_keyword");
        let app = Router::new()
            .route(&format!("/{DATABASE}"), get(database_info).post(create))
            .route(&format!("/{DATABASE}/_all_docs"), get(all_docs))
            .route(&view, get(by_keyword))
            .route(
                &format!("/{DATABASE}/{{id}}"),
                get(read).put(update).delete(delete),
            )
            .layer(middleware::from_fn_with_state(store.clone(), record))
            .with_state(store.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            store,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the `_all_docs` listing of all current documents.
    pub fn catalog(&self) -> String {
        all_docs_body(&lock(&self.store)).to_string()
    }

    /// Answers every subsequent request with `503 Service Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.store).unavailable = unavailable;
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.store).requests.clone()
    }

    /// Returns the current revision of a document, if it exists.
    pub fn revision(&self, id: &str) -> Option<String> {
        lock(&self.store).documents.get(id).map(|d| d.rev.clone())
    }

    /// Returns the number of documents currently stored.
    pub fn document_count(&self) -> usize {
        lock(&self.store).documents.len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(State(store): State<SharedStore>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().map(str::to_owned);
    let if_match = request
        .headers()
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let unavailable = lock(&store).unavailable;
    let response = if unavailable {
        error(StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else {
        next.run(request).await
    };

    lock(&store).requests.push(RecordedRequest {
        method,
        path,
        query,
        if_match,
        status: response.status(),
    });
    response
}

fn error(status: StatusCode, reason: &str) -> Response {
    let error = status.canonical_reason().unwrap_or("error").to_lowercase();
    (status, Json(json!({ "error": error, "reason": reason }))).into_response()
}

fn all_docs_body(store: &Store) -> Value {
    let rows: Vec<_> = store
        .documents
        .iter()
        .map(|(id, doc)| json!({ "id": id, "key": id, "value": { "rev": doc.rev } }))
        .collect();
    json!({ "total_rows": rows.len(), "offset": 0, "rows": rows })
}

async fn database_info(State(store): State<SharedStore>) -> Response {
    let store = lock(&store);
    Json(json!({ "db_name": DATABASE, "doc_count": store.documents.len() })).into_response()
}

async fn all_docs(State(store): State<SharedStore>) -> Response {
    Json(all_docs_body(&lock(&store))).into_response()
}

async fn by_keyword(
    State(store): State<SharedStore>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(key) = params.get("key") else {
        return error(StatusCode::BAD_REQUEST, "missing key");
    };
    let keyword: String = match serde_json::from_str(key) {
        Ok(keyword) => keyword,
        Err(_) => return error(StatusCode::BAD_REQUEST, "invalid key"),
    };
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(usize::MAX);

    let store = lock(&store);
    let rows: Vec<_> = store
        .documents
        .iter()
        .filter(|(_, doc)| {
            doc.body["keywords"]
                .as_array()
                .is_some_and(|words| words.iter().any(|w| w.as_str() == Some(keyword.as_str())))
        })
        .take(limit)
        .map(|(id, _)| json!({ "id": id, "key": keyword, "value": null }))
        .collect();

    Json(json!({ "total_rows": store.documents.len(), "offset": 0, "rows": rows })).into_response()
}

async fn read(State(store): State<SharedStore>, Path(id): Path<String>) -> Response {
    let store = lock(&store);
    let Some(doc) = store.documents.get(&id) else {
        return error(StatusCode::NOT_FOUND, "missing");
    };

    let mut body = doc.body.clone();
    if let Some(object) = body.as_object_mut() {
        object.insert("_id".into(), id.into());
        object.insert("_rev".into(), doc.rev.clone().into());
    }
    Json(body).into_response()
}

async fn create(State(store): State<SharedStore>, Json(body): Json<Value>) -> Response {
    let mut store = lock(&store);
    let id = format!("{:032x}", store.sequence + 1);
    let rev = store.insert(id.clone(), body);
    (
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id": id, "rev": rev })),
    )
        .into_response()
}

/// Returns the revision the client expects, from `If-Match` or the `rev` query parameter.
fn expected_rev(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<String> {
    headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_owned())
        .or_else(|| params.get("rev").cloned())
}

async fn update(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let expected = expected_rev(&headers, &params);
    let mut store = lock(&store);

    let generation = match store.documents.get(&id) {
        Some(doc) if expected.as_deref() == Some(doc.rev.as_str()) => doc.generation + 1,
        Some(_) => return error(StatusCode::CONFLICT, "Document update conflict."),
        None => return error(StatusCode::NOT_FOUND, "missing"),
    };

    let rev = store.next_rev(generation);
    store.documents.insert(
        id.clone(),
        Document {
            generation,
            rev: rev.clone(),
            body,
        },
    );

    (
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id": id, "rev": rev })),
    )
        .into_response()
}

async fn delete(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let expected = expected_rev(&headers, &params);
    let mut store = lock(&store);

    match store.documents.get(&id) {
        Some(doc) if expected.as_deref() == Some(doc.rev.as_str()) => {}
        Some(_) => return error(StatusCode::CONFLICT, "Document update conflict."),
        None => return error(StatusCode::NOT_FOUND, "missing"),
    }

    let Some(doc) = store.documents.remove(&id) else {
        return error(StatusCode::NOT_FOUND, "missing");
    };
    let rev = store.next_rev(doc.generation + 1);
    Json(json!({ "ok": true, "id": id, "rev": rev })).into_response()
}
