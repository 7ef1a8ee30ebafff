//! HTTP API tests driving the router against the mock swarm.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use streamflow_core::engine::SwarmStats;
use streamflow_core::engine::test_mocks::{MetadataBehavior, MockSwarm};
use streamflow_core::torrent::MagnetLink;
use streamflow_core::{StreamflowConfig, StreamingService};
use streamflow_web::{AppState, build_router};
use tower::ServiceExt;

const SRT: &str = "1\r\n00:00:01,000 --> 00:00:02,000\r\n{\\b}Hi{\\b}\r\n";

struct ApiFixture {
    swarm: MockSwarm,
    router: Router,
    show: MagnetLink,
}

impl ApiFixture {
    fn new() -> Self {
        let swarm = MockSwarm::new();
        let show = swarm.add_torrent(
            "Show",
            1024,
            vec![
                ("Show/episode.mp4", video(4096)),
                ("Show/episode.srt", SRT.as_bytes().to_vec()),
            ],
        );
        let service = StreamingService::new(Arc::new(swarm.clone()), StreamflowConfig::for_testing());
        let router = build_router(AppState::new(Arc::new(service)));

        Self {
            swarm,
            router,
            show,
        }
    }

    fn hash(&self) -> String {
        self.show.info_hash.to_string()
    }

    fn metadata_uri(&self) -> String {
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=Show", self.hash());
        format!("/api/torrents/metadata?magnet={}", urlencode(&magnet))
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.get_with(Request::builder().uri(uri)).await
    }

    async fn get_with(&self, builder: axum::http::request::Builder) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn open_show(&self) {
        let response = self.get(&self.metadata_uri()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

fn video(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_metadata_endpoint() {
    let fixture = ApiFixture::new();

    let response = fixture.get(&fixture.metadata_uri()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["infoHash"], fixture.hash());
    assert_eq!(json["name"], "Show");
    assert_eq!(
        json["files"],
        serde_json::json!([{
            "name": "episode.mp4",
            "index": 0,
            "size": 4096,
            "path": "Show/episode.mp4",
            "type": "video/mp4"
        }])
    );
    assert_eq!(json["subtitles"][0]["index"], 1);
    assert_eq!(json["subtitles"][0]["type"], "text/x-subrip");
}

#[tokio::test]
async fn test_metadata_requires_magnet() {
    let fixture = ApiFixture::new();

    let missing = fixture.get("/api/torrents/metadata").await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(missing).await["error"].is_string());

    let invalid = fixture
        .get("/api/torrents/metadata?magnet=http%3A%2F%2Fexample.com")
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_timeout_is_gateway_timeout() {
    let fixture = ApiFixture::new();
    fixture
        .swarm
        .set_metadata_behavior(MetadataBehavior::Withhold);

    let response = fixture.get(&fixture.metadata_uri()).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_stream_full_and_partial() {
    let fixture = ApiFixture::new();
    fixture.open_show().await;
    let uri = format!("/api/torrents/stream/{}/0", fixture.hash());

    let full = fixture.get(&uri).await;
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(full.headers()[header::CONTENT_LENGTH], "4096");
    assert_eq!(full.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(full.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(body_bytes(full).await, video(4096));

    let partial = fixture
        .get_with(
            Request::builder()
                .uri(&uri)
                .header(header::RANGE, "bytes=1000-1999"),
        )
        .await;
    assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(partial.headers()[header::CONTENT_LENGTH], "1000");
    assert_eq!(partial.headers()[header::CONTENT_RANGE], "bytes 1000-1999/4096");
    assert_eq!(body_bytes(partial).await, video(4096)[1000..2000].to_vec());
}

#[tokio::test]
async fn test_stream_range_past_end_is_416() {
    let fixture = ApiFixture::new();
    fixture.open_show().await;

    let response = fixture
        .get_with(
            Request::builder()
                .uri(format!("/api/torrents/stream/{}/0", fixture.hash()))
                .header(header::RANGE, "bytes=4096-4106"),
        )
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */4096");
}

#[tokio::test]
async fn test_stream_error_statuses() {
    let fixture = ApiFixture::new();
    fixture.open_show().await;

    let malformed = fixture.get("/api/torrents/stream/not-a-hash/0").await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let unknown = fixture
        .get(&format!("/api/torrents/stream/{}/0", "ab".repeat(20)))
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let missing_file = fixture
        .get(&format!("/api/torrents/stream/{}/7", fixture.hash()))
        .await;
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
    assert!(body_json(missing_file).await["error"].is_string());
}

#[tokio::test]
async fn test_subtitle_endpoint_serves_webvtt() {
    let fixture = ApiFixture::new();
    fixture.open_show().await;

    let response = fixture
        .get(&format!("/api/torrents/subtitles/{}/1", fixture.hash()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/vtt; charset=utf-8"
    );
    assert_eq!(
        String::from_utf8(body_bytes(response).await).unwrap(),
        "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\n<b>Hi</b>\n"
    );

    let not_subtitle = fixture
        .get(&format!("/api/torrents/subtitles/{}/0", fixture.hash()))
        .await;
    assert_eq!(not_subtitle.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let fixture = ApiFixture::new();
    fixture.open_show().await;
    fixture.swarm.set_stats(SwarmStats {
        downloaded: 1024,
        length: 4096,
        download_speed: 512,
        upload_speed: 64,
        peer_count: 5,
    });

    let response = fixture
        .get(&format!("/api/torrents/stats/{}", fixture.hash()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["progress"], 0.25);
    assert_eq!(json["downloadSpeed"], 512);
    assert_eq!(json["uploadSpeed"], 64);
    assert_eq!(json["numPeers"], 5);
    assert_eq!(json["timeRemaining"], 6);
    assert_eq!(json["bytesRemaining"], 3072);

    let unknown = fixture
        .get(&format!("/api/torrents/stats/{}", "cd".repeat(20)))
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_counts_transfers() {
    let fixture = ApiFixture::new();

    let before = body_json(fixture.get("/health").await).await;
    assert_eq!(before["status"], "ok");
    assert_eq!(before["activeTransfers"], 0);

    fixture.open_show().await;
    let after = body_json(fixture.get("/health").await).await;
    assert_eq!(after["activeTransfers"], 1);
}
