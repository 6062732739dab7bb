use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, http::StatusCode, Router};
use bytes::Bytes;
use datakit_io::net::{
    client::http::HttpClient,
    dns::Resolver,
    util::retry::{FixedDelayRetryPolicy, ServerErrorClassifier, StandardHttpRetryLifecycle},
};
use http::Request;
use http_body_util::Full;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

/// Starts a server answering every request with `status`, and returns its address and request counter.
async fn server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .fallback(move |State(hits): State<Arc<AtomicUsize>>| async move {
            hits.fetch_add(1, Ordering::SeqCst);
            status
        })
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), hits)
}

fn client(max_attempts: u32) -> HttpClient {
    let policy = FixedDelayRetryPolicy::new(ServerErrorClassifier, max_attempts, Duration::from_millis(5))
        .with_retry_lifecycle(StandardHttpRetryLifecycle);
    HttpClient::builder()
        .with_resolver(Resolver::system())
        .with_http_trace(true)
        .with_api_telemetry(true)
        .with_retry_policy(policy)
        .build()
        .unwrap()
}

fn post(url: &str) -> Request<Full<Bytes>> {
    Request::post(url)
        .body(Full::new(Bytes::from_static(b"cpu usage=1i 1")))
        .unwrap()
}

#[tokio::test]
async fn server_errors_use_the_whole_attempt_budget() {
    let (base, hits) = server(StatusCode::INTERNAL_SERVER_ERROR).await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    {
        let _guard = metrics::set_default_local_recorder(&recorder);
        let resp = client(4)
            .send(post(&format!("{}/v1/write/logging?token=tkn_x", base)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    let mut retries = 0;
    let mut new_conns = 0;
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let name = key.key().name().to_string();
        let DebugValue::Counter(n) = value else { continue };
        match name.as_str() {
            "datakit_io_http_retry_total" => {
                let api = key.key().labels().find(|l| l.key() == "api").map(|l| l.value().to_string());
                assert_eq!(api.as_deref(), Some("/v1/write/logging"));
                retries += n;
            }
            "datakit_io_http_new_conn_total" => new_conns += n,
            _ => {}
        }
    }
    assert_eq!(retries, 3);
    assert!(new_conns >= 1);
}

#[tokio::test]
async fn client_errors_are_sent_once() {
    let (base, hits) = server(StatusCode::FORBIDDEN).await;

    let resp = client(4).send(post(&format!("{}/v1/write/metric", base))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connection_refused_is_an_error() {
    // Nothing listens on the discard port of the loopback address.
    let mut client = client(2);
    let result = client.send(post("http://127.0.0.1:9/v1/write/metric")).await;
    assert!(result.is_err());
}
