//! A mock dataway for integration tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    Router,
};
use bytes::Bytes;
use datakit_config::HumanDuration;
use datakit_dataway::DatawayConfiguration;
use datakit_io::compression::gunzip;
use datakit_point::{lineproto, Point};

/// A request received by the mock dataway.
#[derive(Clone, Debug)]
pub struct Received {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decodes the body as line protocol.
    pub async fn points(&self) -> Vec<Point> {
        let raw = if self.header("content-encoding") == Some("gzip") {
            gunzip(&self.body).await.unwrap()
        } else {
            self.body.to_vec()
        };
        lineproto::parse(std::str::from_utf8(&raw).unwrap()).unwrap()
    }
}

struct MockState {
    status: AtomicU16,
    response_body: Mutex<String>,
    received: Mutex<Vec<Received>>,
}

/// An HTTP server that records every request and answers with a configurable status.
#[derive(Clone)]
pub struct MockDataway {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockDataway {
    pub async fn start(status: StatusCode) -> Self {
        let state = Arc::new(MockState {
            status: AtomicU16::new(status.as_u16()),
            response_body: Mutex::new(String::new()),
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Returns the dataway URL, with `token` as the workspace token.
    pub fn url(&self, token: &str) -> String {
        format!("http://{}?token={}", self.addr, token)
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn set_response_body(&self, body: &str) {
        *self.state.response_body.lock().unwrap() = body.to_string();
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    /// Returns the total number of points received on write paths.
    pub async fn received_points(&self) -> usize {
        let mut total = 0;
        for req in self.received() {
            total += req.points().await.len();
        }
        total
    }
}

async fn handle(State(state): State<Arc<MockState>>, req: Request) -> (StatusCode, String) {
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap();

    state.received.lock().unwrap().push(Received {
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    });

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    (status, state.response_body.lock().unwrap().clone())
}

/// Returns a configuration for the given URLs, with quick retries.
pub fn config(urls: &[String]) -> DatawayConfiguration {
    let mut config = DatawayConfiguration::from_urls(urls.iter().cloned());
    config.retry_delay = HumanDuration(Duration::from_millis(10));
    config.http_timeout = HumanDuration::from_secs(5);
    config.dns_cache_interval = None;
    config
}
