use axum::{
    extract::Request,
    http::StatusCode,
    response::Redirect,
    routing::get,
    Router,
};
use futures::StreamExt;
use sluice_net::{Headers, HttpClient, Net, NetError, NetOptions, RangeSpec};
use tokio::net::TcpListener;
use url::Url;

async fn run_test_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

fn test_app() -> Router {
    Router::new()
        .route("/payload.bin", get(|| async { "0123456789" }))
        .route(
            "/moved.bin",
            get(|| async { Redirect::permanent("/payload.bin") }),
        )
        .route(
            "/missing.bin",
            get(|| async { StatusCode::NOT_FOUND }),
        )
        .route(
            "/echo-range",
            get(|req: Request| async move {
                req.headers()
                    .get("range")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string()
            }),
        )
}

#[tokio::test]
async fn get_buffers_full_body() {
    let base = run_test_server(test_app()).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let url: Url = format!("{base}/payload.bin").parse().unwrap();

    let fetched = client.get(url.clone(), &Headers::new()).await.unwrap();
    assert_eq!(&fetched.bytes[..], b"0123456789");
    assert_eq!(fetched.effective_url, url);
}

#[tokio::test]
async fn get_reports_post_redirect_url() {
    let base = run_test_server(test_app()).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let url: Url = format!("{base}/moved.bin").parse().unwrap();

    let fetched = client.get(url, &Headers::new()).await.unwrap();
    assert_eq!(&fetched.bytes[..], b"0123456789");
    assert_eq!(fetched.effective_url.path(), "/payload.bin");
}

#[tokio::test]
async fn get_surfaces_status_errors_without_retry() {
    let base = run_test_server(test_app()).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let url: Url = format!("{base}/missing.bin").parse().unwrap();

    let err = client.get(url, &Headers::new()).await.unwrap_err();
    match err {
        NetError::Status { status, .. } => assert_eq!(status, 404),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_applies_range_header() {
    let base = run_test_server(test_app()).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let url: Url = format!("{base}/echo-range").parse().unwrap();

    let mut stream = client
        .stream(url, &Headers::new(), Some(RangeSpec::new(100, Some(199))))
        .await
        .unwrap();

    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, b"bytes=100-199");
}

#[tokio::test]
async fn custom_headers_are_sent() {
    let app = Router::new().route(
        "/check",
        get(|req: Request| async move {
            req.headers()
                .get("x-session")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        }),
    );
    let base = run_test_server(app).await;
    let client = HttpClient::new(NetOptions::default()).unwrap();
    let url: Url = format!("{base}/check").parse().unwrap();

    let mut headers = Headers::new();
    headers.insert("X-Session", "abc123");

    let fetched = client.get(url, &headers).await.unwrap();
    assert_eq!(&fetched.bytes[..], b"abc123");
}
