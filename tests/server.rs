//! HTTP boundary tests, driven through the router with `tower::ServiceExt`.

#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use slidecite::pipeline::llm::{AnalysisRequest, EngineReply};
use slidecite::prompts::NO_NEW_SOURCES;
use slidecite::server::{router, AppState, ServerConfig, SuggestResponse};
use slidecite::{CheckConfig, CitationAnalyzer, EngineError, ReasoningEngine};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 255]));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

struct EchoEngine {
    reply: Result<String, EngineError>,
    texts: Mutex<Vec<String>>,
}

impl EchoEngine {
    fn replying(reply: Result<String, EngineError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            texts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ReasoningEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn submit(&self, request: &AnalysisRequest) -> Result<EngineReply, EngineError> {
        self.texts.lock().unwrap().push(request.text());
        self.reply.clone().map(|content| EngineReply {
            content,
            ..Default::default()
        })
    }
}

fn app(engine: Arc<dyn ReasoningEngine>) -> axum::Router {
    let analyzer = CitationAnalyzer::new(engine, &CheckConfig::default());
    router(AppState::new(analyzer), &ServerConfig::default())
}

fn suggest_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/suggest")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn suggest_returns_reference_list() {
    let engine = EchoEngine::replying(Ok("- Smith, A. (2020). *Chart* [Figure].".into()));
    let response = app(engine.clone())
        .oneshot(suggest_request(serde_json::json!({
            "text": "Market share 2020",
            "image_base64": STANDARD.encode(tiny_png()),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let parsed: SuggestResponse = serde_json::from_value(body).unwrap();
    assert!(parsed.suggestion.starts_with("- Smith"));
    assert_eq!(
        engine.texts.lock().unwrap().as_slice(),
        ["Market share 2020".to_string()]
    );
}

#[tokio::test]
async fn sentinel_is_returned_verbatim() {
    let engine = EchoEngine::replying(Ok(format!("  {NO_NEW_SOURCES}\n")));
    let response = app(engine)
        .oneshot(suggest_request(serde_json::json!({
            "text": "",
            "image_base64": format!("data:image/png;base64,{}", STANDARD.encode(tiny_png())),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["suggestion"], NO_NEW_SOURCES);
}

#[tokio::test]
async fn missing_text_defaults_to_empty() {
    let engine = EchoEngine::replying(Ok(NO_NEW_SOURCES.into()));
    let response = app(engine.clone())
        .oneshot(suggest_request(serde_json::json!({
            "image_base64": STANDARD.encode(tiny_png()),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(engine.texts.lock().unwrap().as_slice(), [String::new()]);
}

#[tokio::test]
async fn engine_failure_is_500_with_detail() {
    let engine = EchoEngine::replying(Err(EngineError::Provider("upstream down".into())));
    let response = app(engine)
        .oneshot(suggest_request(serde_json::json!({
            "text": "x",
            "image_base64": STANDARD.encode(tiny_png()),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(detail.contains("upstream down"), "got {detail}");
}

#[tokio::test]
async fn bad_base64_is_400() {
    let engine = EchoEngine::replying(Ok(NO_NEW_SOURCES.into()));
    let response = app(engine.clone())
        .oneshot(suggest_request(serde_json::json!({
            "text": "x",
            "image_base64": "%%% not base64 %%%",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["detail"].is_string());
    assert!(engine.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn base64_that_is_not_an_image_is_400() {
    let engine = EchoEngine::replying(Ok(NO_NEW_SOURCES.into()));
    let response = app(engine)
        .oneshot(suggest_request(serde_json::json!({
            "text": "x",
            "image_base64": STANDARD.encode(b"plain text, not pixels"),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_is_400() {
    let engine = EchoEngine::replying(Ok(NO_NEW_SOURCES.into()));
    let request = Request::builder()
        .method("POST")
        .uri("/api/suggest")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"text\": "))
        .unwrap();
    let response = app(engine).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["detail"].is_string());
}

#[tokio::test]
async fn health_reports_ok() {
    let engine = EchoEngine::replying(Ok(NO_NEW_SOURCES.into()));
    let response = app(engine)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert_eq!(json_body(response).await["status"], "ok");
}
