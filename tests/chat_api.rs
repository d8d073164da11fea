use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures_util::stream;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use gateway::config::{AuthToken, ProviderKind, Settings};
use gateway::error::{GatewayError, Result};
use gateway::providers::streaming::ChunkStream;
use gateway::providers::types::{StreamChunk, Usage};
use gateway::providers::{GenerationParams, Message, ProviderAdapter, ProviderResponse};
use gateway::server::auth::StaticTokenAuth;
use gateway::server::provider_dispatch::ProviderRegistry;
use gateway::server::storage_traits::HttpObjectStore;
use gateway::server::{AppState, create_app};

const TOKEN: &str = "test-token";

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    Fail(&'static str),
}

#[derive(Debug, Clone)]
struct Seen {
    model: String,
    messages: Vec<Message>,
    params: GenerationParams,
}

struct FakeAdapter {
    kind: ProviderKind,
    reply: Reply,
    seen: Mutex<Option<Seen>>,
}

impl FakeAdapter {
    fn new(kind: ProviderKind, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply,
            seen: Mutex::new(None),
        })
    }

    fn record(&self, model: &str, messages: &[Message], params: &GenerationParams) {
        *self.seen.lock().unwrap() = Some(Seen {
            model: model.to_string(),
            messages: messages.to_vec(),
            params: params.clone(),
        });
    }

    fn seen(&self) -> Seen {
        self.seen.lock().unwrap().clone().expect("adapter was not called")
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate_response(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ProviderResponse> {
        self.record(model, messages, params);
        match self.reply {
            Reply::Text(text) => Ok(ProviderResponse {
                content: text.to_string(),
                model: model.to_string(),
                provider: self.kind,
                usage: Usage::new(5, 7),
                is_truncated: false,
                stop_reason: Some("stop".into()),
            }),
            Reply::Fail(msg) => Err(GatewayError::Stream(msg.to_string())),
        }
    }

    async fn generate_stream(
        &self,
        model: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream> {
        self.record(model, messages, params);
        let items: Vec<Result<StreamChunk>> = match self.reply {
            Reply::Text(text) => vec![
                Ok(StreamChunk::delta(text)),
                Ok(StreamChunk::finished(Some(Usage::new(5, 7)), Some("stop".into()), false)),
            ],
            Reply::Fail(msg) => vec![
                Ok(StreamChunk::delta("partial")),
                Err(GatewayError::Stream(msg.to_string())),
            ],
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

fn app(adapters: Vec<Arc<FakeAdapter>>) -> Router {
    let mut settings = Settings::default();
    settings.auth.tokens = vec![AuthToken {
        token: TOKEN.into(),
        user_id: "u-1".into(),
        role: "user".into(),
        professional_role: None,
    }];
    let registry = adapters
        .into_iter()
        .fold(ProviderRegistry::default(), |r, a| r.with_adapter(a));
    let auth = Arc::new(StaticTokenAuth::new(&settings.auth.tokens));
    let store = Arc::new(HttpObjectStore::new(reqwest::Client::new()));
    create_app(AppState::with_collaborators(settings, registry, auth, store))
}

fn json_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

#[tokio::test]
async fn sync_gpt5_is_served_by_openai() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("Hi there"));
    let resp = app(vec![openai.clone()])
        .oneshot(json_request(json!({
            "model": "gpt-5",
            "stream": false,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["data"]["provider"], "openai");
    assert_eq!(v["data"]["content"], "Hi there");
    assert_eq!(v["data"]["usage"]["totalTokens"], 12);
    assert_eq!(v["data"]["isTruncated"], false);
    assert!(v.get("fileValidationWarnings").is_none());

    let seen = openai.seen();
    assert_eq!(seen.model, "gpt-5");
    assert_eq!(seen.params.max_tokens, 16_384);
}

#[tokio::test]
async fn rate_limit_failure_maps_to_429() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Fail("rate limit exceeded"));
    let resp = app(vec![openai])
        .oneshot(json_request(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let v = body_json(resp).await;
    assert_eq!(v["success"], false);
    assert!(v["error"].as_str().unwrap().contains("sending messages too quickly"));
}

#[tokio::test]
async fn missing_credentials_are_rejected_before_any_provider_work() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("unused"));
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"messages":[{"role":"user","content":"Hello"}]}"#))
        .unwrap();
    let resp = app(vec![openai.clone()]).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(openai.seen.lock().unwrap().is_none());
}

#[tokio::test]
async fn missing_messages_is_a_bad_request() {
    let resp = app(vec![FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("unused"))])
        .oneshot(json_request(json!({"model": "gpt-5"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await;
    assert_eq!(v["success"], false);
    assert!(v["error"].as_str().unwrap().contains("messages"));
}

#[tokio::test]
async fn unconfigured_provider_is_service_unavailable() {
    let resp = app(vec![FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("unused"))])
        .oneshot(json_request(json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn extended_thinking_budget_is_capped_by_model_ceiling() {
    let anthropic = FakeAdapter::new(ProviderKind::Anthropic, Reply::Text("ok"));
    let resp = app(vec![anthropic.clone()])
        .oneshot(json_request(json!({
            "model": "claude-opus-4-1",
            "extended_thinking": true,
            "thinking_budget_tokens": 4096,
            "temperature": 0.2,
            "messages": [{"role": "user", "content": "Think"}]
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = anthropic.seen();
    assert_eq!(seen.params.max_tokens, 32_000);
    assert_eq!(seen.params.temperature, 1.0);
}

#[tokio::test]
async fn rejected_attachments_are_reported_and_dropped() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("ok"));
    let resp = app(vec![openai.clone()])
        .oneshot(json_request(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "old", "files": [
                    {"name": "old.txt", "type": "text/plain", "data": "b2xk"}
                ]},
                {"role": "assistant", "content": "noted"},
                {"role": "user", "content": "look", "files": [
                    {"name": "notes.txt", "type": "text/plain", "data": "aGVsbG8="},
                    {"name": "setup.exe", "type": "application/x-msdownload", "data": "TVo="}
                ]}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let warnings = v["fileValidationWarnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["fileName"], "setup.exe");

    let seen = openai.seen();
    assert!(seen.messages[0].files.is_empty());
    let kept: Vec<_> = seen.messages[2].files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(kept, vec!["notes.txt"]);
}

#[tokio::test]
async fn stream_ends_with_exactly_one_done_marker() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("Hello"));
    let resp = app(vec![openai])
        .oneshot(json_request(json!({
            "model": "gpt-5",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(resp.headers()["x-accel-buffering"], "no");

    let text = String::from_utf8(body_bytes(resp).await).unwrap();
    assert_eq!(text.matches("data: [DONE]").count(), 1);
    assert!(text.trim_end().ends_with("data: [DONE]"));
    assert!(text.contains(r#""content":"Hello""#));
    assert!(text.contains(r#""isComplete":true"#));
}

#[tokio::test]
async fn stream_failure_is_a_final_error_chunk() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Fail("429 Too Many Requests: rate limit"));
    let resp = app(vec![openai])
        .oneshot(json_request(json!({
            "model": "gpt-5",
            "stream": true,
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();

    let text = String::from_utf8(body_bytes(resp).await).unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .collect();
    assert_eq!(events.len(), 3, "{}", text);
    let err: Value = serde_json::from_str(events[1]).unwrap();
    assert_eq!(err["isComplete"], true);
    assert_eq!(err["error"], "rate_limited");
    assert_eq!(events[2], "[DONE]");
}

#[tokio::test]
async fn multipart_upload_attaches_files_to_last_user_message() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("ok"));
    let boundary = "gatewayboundary";
    let messages = json!([
        {"role": "user", "content": "first"},
        {"role": "assistant", "content": "reply"},
        {"role": "user", "content": "summarise this"}
    ]);
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"messages\"\r\n\r\n{m}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\ngpt-4o\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"stream\"\r\n\r\nfalse\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file_0\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nhello world\r\n\
         --{b}--\r\n",
        b = boundary,
        m = messages
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let resp = app(vec![openai.clone()]).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = openai.seen();
    assert_eq!(seen.model, "gpt-4o");
    assert!(seen.messages[0].files.is_empty());
    let files = &seen.messages[2].files;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "notes.txt");
    assert_eq!(files[0].mime_type, "text/plain");
    assert_eq!(files[0].size, 11);
}

#[tokio::test]
async fn multipart_upload_without_user_message_is_reported() {
    let openai = FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("ok"));
    let boundary = "gatewayboundary";
    let messages = json!([{"role": "assistant", "content": "how can I help?"}]);
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"messages\"\r\n\r\n{m}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file_0\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nhello world\r\n\
         --{b}--\r\n",
        b = boundary,
        m = messages
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let resp = app(vec![openai.clone()]).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let warnings = v["fileValidationWarnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["fileName"], "notes.txt");
    assert!(openai.seen().messages.iter().all(|m| m.files.is_empty()));
}

#[tokio::test]
async fn health_lists_configured_providers() {
    let resp = app(vec![
        FakeAdapter::new(ProviderKind::Google, Reply::Text("x")),
        FakeAdapter::new(ProviderKind::OpenAI, Reply::Text("x")),
    ])
    .oneshot(Request::get("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["status"], "ok");
    assert_eq!(v["providers"], json!(["openai", "google"]));
}

#[tokio::test]
async fn preflight_echoes_allowed_origin() {
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/chat")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let resp = app(Vec::new()).oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}
