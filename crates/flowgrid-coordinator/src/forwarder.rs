//! Request forwarder: proxies `/ingest/<stream-id>[/<subpath>]` calls to
//! the worker running that stream.

use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use flowgrid_rpc::IngestCall;
use flowgrid_state::{StreamId, StreamRepository, WorkerRepository};
use regex::Regex;
use tracing::debug;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::repositories::Repositories;
use crate::routing::RoutingTable;
use crate::worker_manager::WorkerManager;

static INGEST_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/ingest/([^/]+)(/.*)?$").expect("valid ingest path pattern")
});

/// The worker's reply, passed back to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResponse {
    pub status_code: i32,
    pub body: Bytes,
}

/// A parsed ingest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestTarget {
    pub stream_id: StreamId,
    /// Everything after the stream id, empty when absent.
    pub subpath: String,
}

impl IngestTarget {
    pub fn parse(path: &str) -> CoordinatorResult<Self> {
        let captures = INGEST_PATH
            .captures(path)
            .ok_or_else(|| CoordinatorError::InvalidPath(path.to_string()))?;
        let raw_id = &captures[1];
        let malformed = || CoordinatorError::MalformedStreamId(raw_id.to_string());
        // `parse` alone would accept a leading sign.
        if !raw_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let stream_id = raw_id.parse::<StreamId>().map_err(|_| malformed())?;
        let subpath = captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok(Self { stream_id, subpath })
    }
}

pub struct RequestForwarder {
    workers: Arc<WorkerManager>,
    worker_repo: Arc<dyn WorkerRepository>,
    streams: Arc<dyn StreamRepository>,
    routing: Arc<RoutingTable>,
}

impl RequestForwarder {
    pub fn new(
        workers: Arc<WorkerManager>,
        repos: &Repositories,
        routing: Arc<RoutingTable>,
    ) -> Self {
        Self {
            workers,
            worker_repo: Arc::clone(&repos.workers),
            streams: Arc::clone(&repos.streams),
            routing,
        }
    }

    /// Forward one inbound request. The path is validated before any
    /// repository or RPC access.
    pub async fn forward_request_to_worker(
        &self,
        request: http::Request<Bytes>,
    ) -> CoordinatorResult<ForwardedResponse> {
        let target = IngestTarget::parse(request.uri().path())?;

        let Some(route) = self.routing.get_route(target.stream_id) else {
            return Err(match self.streams.find_stream(target.stream_id)? {
                Some(_) => CoordinatorError::StreamUnassigned(target.stream_id),
                None => CoordinatorError::StreamNotFound(target.stream_id),
            });
        };

        let worker = self
            .worker_repo
            .find_worker(&route.worker_id)?
            .ok_or_else(|| CoordinatorError::WorkerNotFound(route.worker_id.clone()))?;
        let client = self.workers.get_worker_client(&worker)?;

        let content_type = request
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let method = request.method().to_string();

        debug!(
            stream_id = target.stream_id,
            worker_id = %route.worker_id,
            worker_stream_id = route.worker_stream_id,
            %method,
            subpath = %target.subpath,
            "forwarding ingest request"
        );

        let reply = client
            .ingest(IngestCall {
                worker_stream_id: route.worker_stream_id,
                method,
                path: target.subpath,
                content_type,
                body: request.into_body(),
            })
            .await?;

        Ok(ForwardedResponse {
            status_code: reply.status_code,
            body: reply.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_rpc::ClientRegistry;
    use flowgrid_rpc::testing::FakeCluster;
    use flowgrid_state::{Component, NewStream, StateStore, Worker};

    struct Fixture {
        store: StateStore,
        cluster: Arc<FakeCluster>,
        routing: Arc<RoutingTable>,
        forwarder: RequestForwarder,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        store
            .add_or_activate(&Worker::new("w-1", "127.0.0.1:50051"))
            .unwrap();
        let repos = Repositories::from_store(store.clone());
        let cluster = Arc::new(FakeCluster::new());
        let manager = Arc::new(WorkerManager::new(
            &repos,
            ClientRegistry::new(cluster.clone()),
        ));
        let routing = Arc::new(RoutingTable::new());
        let forwarder = RequestForwarder::new(manager, &repos, Arc::clone(&routing));
        Fixture {
            store,
            cluster,
            routing,
            forwarder,
        }
    }

    fn request(method: &str, path: &str, body: &'static [u8]) -> http::Request<Bytes> {
        http::Request::builder()
            .method(method)
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(body))
            .unwrap()
    }

    fn create_stream(store: &StateStore) -> i64 {
        store
            .create(&NewStream::new(
                "webhook",
                Component::new("in", "http_server", ""),
                Component::new("out", "drop", ""),
            ))
            .unwrap()
            .id
    }

    #[test]
    fn parse_accepts_id_with_and_without_subpath() {
        assert_eq!(
            IngestTarget::parse("/ingest/42").unwrap(),
            IngestTarget {
                stream_id: 42,
                subpath: String::new()
            }
        );
        assert_eq!(
            IngestTarget::parse("/ingest/42/hooks/github").unwrap().subpath,
            "/hooks/github"
        );
    }

    #[test]
    fn parse_rejects_foreign_paths() {
        for path in ["/", "/ingest", "/ingest/", "/api/v1/ingest/1", "/ingest//x"] {
            assert!(
                matches!(IngestTarget::parse(path), Err(CoordinatorError::InvalidPath(_))),
                "{path}"
            );
        }
    }

    #[test]
    fn parse_rejects_non_numeric_ids() {
        assert!(matches!(
            IngestTarget::parse("/ingest/abc/x"),
            Err(CoordinatorError::MalformedStreamId(id)) if id == "abc"
        ));
        assert!(matches!(
            IngestTarget::parse("/ingest/99999999999999999999"),
            Err(CoordinatorError::MalformedStreamId(_))
        ));
        assert!(matches!(
            IngestTarget::parse("/ingest/+7"),
            Err(CoordinatorError::MalformedStreamId(id)) if id == "+7"
        ));
        assert!(matches!(
            IngestTarget::parse("/ingest/-3/x"),
            Err(CoordinatorError::MalformedStreamId(id)) if id == "-3"
        ));
    }

    #[tokio::test]
    async fn forwards_to_routed_worker() {
        let f = fixture();
        let stream_id = create_stream(&f.store);
        f.routing.set_stream_worker(stream_id, "w-1", 7);
        f.cluster.worker("w-1").set_ingest_reply(202, b"accepted");

        let response = f
            .forwarder
            .forward_request_to_worker(request("POST", &format!("/ingest/{stream_id}/events"), b"{}"))
            .await
            .unwrap();

        assert_eq!(response.status_code, 202);
        assert_eq!(response.body, Bytes::from_static(b"accepted"));

        let calls = f.cluster.worker("w-1").ingested();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].worker_stream_id, 7);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].path, "/events");
        assert_eq!(calls[0].content_type, "application/json");
        assert_eq!(calls[0].body, Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn worker_error_status_passes_through() {
        let f = fixture();
        let stream_id = create_stream(&f.store);
        f.routing.set_stream_worker(stream_id, "w-1", 7);
        f.cluster.worker("w-1").set_ingest_reply(422, b"bad payload");

        let response = f
            .forwarder
            .forward_request_to_worker(request("POST", &format!("/ingest/{stream_id}"), b"x"))
            .await
            .unwrap();
        assert_eq!(response.status_code, 422);
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let f = fixture();
        let err = f
            .forwarder
            .forward_request_to_worker(request("POST", "/ingest/404", b""))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::StreamNotFound(404)));
    }

    #[tokio::test]
    async fn existing_but_unrouted_stream_is_unassigned() {
        let f = fixture();
        let stream_id = create_stream(&f.store);
        let err = f
            .forwarder
            .forward_request_to_worker(request("GET", &format!("/ingest/{stream_id}"), b""))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::StreamUnassigned(id) if id == stream_id));
    }

    #[tokio::test]
    async fn invalid_path_touches_nothing() {
        let f = fixture();
        let err = f
            .forwarder
            .forward_request_to_worker(request("GET", "/metrics", b""))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidPath(_)));
        assert_eq!(f.cluster.connect_count("w-1"), 0);
    }

    #[tokio::test]
    async fn route_to_unknown_worker_is_worker_not_found() {
        let f = fixture();
        let stream_id = create_stream(&f.store);
        f.routing.set_stream_worker(stream_id, "ghost", 1);

        let err = f
            .forwarder
            .forward_request_to_worker(request("POST", &format!("/ingest/{stream_id}"), b""))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerNotFound(id) if id == "ghost"));
    }
}
