//! End-to-end tests for the HTTP API, driven in-process through the router.
//!
//! Model providers are replaced by a deterministic bag-of-words embedder
//! and a chat model that echoes its prompt, so answers reveal exactly
//! which context was retrieved. Tokens are minted locally with the
//! configured HS256 secret.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use pdf_chat::chat::NO_INDEX_ANSWER;
use pdf_chat::config::Config;
use pdf_chat::embedding::Embedder;
use pdf_chat::index::{IndexStore, VectorIndex};
use pdf_chat::llm::ChatModel;
use pdf_chat::models::Chunk;
use pdf_chat::provider::ProviderError;
use pdf_chat::server::{build_router, AppState};

const SECRET: &str = "integration-test-secret";
const BOUNDARY: &str = "pdfchat-test-boundary";
const DIMS: usize = 64;

// ============ Fakes ============

#[derive(Default)]
struct BagOfWordsEmbedder {
    calls: AtomicUsize,
}

fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u32 = 2166136261;
        for b in word.to_lowercase().bytes() {
            h = (h ^ b as u32).wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed(t)).collect())
    }
}

struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(prompt.to_string())
    }
}

// ============ Harness ============

struct TestApp {
    _tmp: TempDir,
    state: AppState,
    router: Router,
    embedder: Arc<BagOfWordsEmbedder>,
}

fn setup() -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.server.upload_dir = tmp.path().join("uploads");
    config.sessions.path = tmp.path().join("sessions.json");
    config.index.root = tmp.path().join("vector_db");
    config.auth.jwt_secret = Some(SECRET.to_string());

    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let state = AppState::new(config, embedder.clone(), Arc::new(EchoModel)).unwrap();
    let router = build_router(state.clone());
    TestApp {
        _tmp: tmp,
        state,
        router,
        embedder,
    }
}

fn token_for(user_id: &str, exp_offset_secs: i64) -> String {
    let claims = json!({
        "sub": user_id,
        "email": format!("{}@example.com", user_id),
        "aud": "authenticated",
        "exp": chrono::Utc::now().timestamp() + exp_offset_secs,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn upload(token: Option<&str>, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
            BOUNDARY, field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Single-page PDF showing `phrase` in Helvetica, with a correct xref table.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

// ============ Unauthenticated routes ============

#[tokio::test]
async fn root_and_health() {
    let app = setup();

    let (status, body) = send(&app, get("/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "PDF Chat API is running");

    let (status, body) = send(&app, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn signup_rejects_invalid_email() {
    let app = setup();
    let (status, body) = send(
        &app,
        post_json("/api/auth/signup", None, json!({ "email": "nope", "password": "pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "unprocessable");
}

#[tokio::test]
async fn login_without_identity_provider_is_config_error() {
    let app = setup();
    let (status, body) = send(
        &app,
        post_json("/api/auth/login", None, json!({ "email": "a@b.c", "password": "pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Supabase credentials not configured");
    assert_eq!(body["code"], "config");
}

// ============ Authentication ============

#[tokio::test]
async fn missing_token_is_401() {
    let app = setup();
    let (status, body) = send(&app, get("/api/sessions", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Not authenticated");

    let (status, _) = send(&app, upload(None, "file", "doc.pdf", b"%PDF-1.4")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_scheme_is_case_insensitive() {
    let app = setup();
    let token = token_for("alice", 3600);
    for scheme in ["bearer", "BEARER", "Bearer"] {
        let req = Request::builder()
            .method("GET")
            .uri("/api/sessions")
            .header(header::AUTHORIZATION, format!("{} {}", scheme, token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK, "scheme {}: {}", scheme, body);
    }

    let req = Request::builder()
        .method("GET")
        .uri("/api/sessions")
        .header(header::AUTHORIZATION, format!("Basic {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Not authenticated");
}

#[tokio::test]
async fn expired_token_is_401() {
    let app = setup();
    let token = token_for("alice", -3600);
    let (status, body) = send(&app, get("/api/sessions", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Token expired");
}

// ============ Upload ============

#[tokio::test]
async fn upload_rejects_non_pdf_filename() {
    let app = setup();
    let token = token_for("alice", 3600);
    let (status, body) = send(&app, upload(Some(&token), "file", "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Only PDF files are allowed");
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
async fn upload_without_file_field() {
    let app = setup();
    let token = token_for("alice", 3600);
    let (status, body) = send(&app, upload(Some(&token), "attachment", "doc.pdf", b"%PDF")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No file uploaded");
}

#[tokio::test]
async fn unreadable_pdf_is_not_registered() {
    let app = setup();
    let token = token_for("alice", 3600);
    let (status, body) = send(&app, upload(Some(&token), "file", "broken.pdf", b"garbage")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert_eq!(body["detail"], "File is not a PDF");
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
async fn upload_then_chat() {
    let app = setup();
    let token = token_for("alice", 3600);
    let pdf = minimal_pdf_with_phrase("the warranty covers water damage");

    let (status, body) = send(&app, upload(Some(&token), "file", "manual.pdf", &pdf)).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {}", body);
    assert_eq!(body["filename"], "manual.pdf");
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "PDF processed successfully");
    assert!(body["chunks"].as_u64().unwrap() >= 1);

    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(app.state.sessions.verify_ownership(&session_id, "alice"));

    let uploaded = app
        .state
        .config
        .server
        .upload_dir
        .join(format!("{}.pdf", session_id));
    assert!(uploaded.exists());

    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&token),
            json!({ "question": "does the warranty cover water damage?", "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "chat failed: {}", body);

    let answer = body["answer"].as_str().unwrap();
    assert!(answer.contains("warranty"));
    assert!(answer.contains("Question: does the warranty cover water damage?"));

    let sources = body["sources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert!(sources[0].as_str().unwrap().ends_with("..."));
}

// ============ Chat ============

#[tokio::test]
async fn chat_on_foreign_session_is_403() {
    let app = setup();
    let session_id = uuid::Uuid::new_v4().to_string();
    app.state
        .sessions
        .create(&session_id, "alice", "a.pdf")
        .await
        .unwrap();

    let bob = token_for("bob", 3600);
    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&bob),
            json!({ "question": "what?", "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "You don't have access to this session");
}

#[tokio::test]
async fn foreign_session_with_index_is_never_searched() {
    let app = setup();
    let session_id = uuid::Uuid::new_v4().to_string();
    let chunk = Chunk {
        id: "c0".to_string(),
        session_id: session_id.clone(),
        chunk_index: 0,
        text: "alice's private salary figures".to_string(),
    };
    let index = VectorIndex::build(
        &session_id,
        "bag-of-words",
        &[chunk.clone()],
        vec![embed(&chunk.text)],
    )
    .unwrap();
    IndexStore::new(app.state.config.index.root.clone())
        .save(&index)
        .await
        .unwrap();
    app.state
        .sessions
        .create(&session_id, "alice", "salary.pdf")
        .await
        .unwrap();

    let alice = token_for("alice", 3600);
    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&alice),
            json!({ "question": "salary figures?", "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["answer"].as_str().unwrap().contains("salary figures"));
    let calls_after_owner = app.embedder.calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_owner, 1);

    let bob = token_for("bob", 3600);
    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&bob),
            json!({ "question": "salary figures?", "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "You don't have access to this session");
    assert!(body.get("answer").is_none());
    assert_eq!(app.embedder.calls.load(Ordering::SeqCst), calls_after_owner);
}

#[tokio::test]
async fn chat_on_unknown_session_is_403() {
    let app = setup();
    let token = token_for("alice", 3600);
    let (status, _) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&token),
            json!({ "question": "what?", "session_id": "does-not-exist" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn chat_without_index_asks_for_upload() {
    let app = setup();
    let session_id = uuid::Uuid::new_v4().to_string();
    app.state
        .sessions
        .create(&session_id, "alice", "a.pdf")
        .await
        .unwrap();

    let token = token_for("alice", 3600);
    let (status, body) = send(
        &app,
        post_json(
            "/api/chat",
            Some(&token),
            json!({ "question": "anything?", "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], NO_INDEX_ANSWER);
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn chat_with_malformed_body_is_422() {
    let app = setup();
    let token = token_for("alice", 3600);
    let (status, body) = send(
        &app,
        post_json("/api/chat", Some(&token), json!({ "question": "no session id" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "unprocessable");
}

// ============ Sessions ============

#[tokio::test]
async fn sessions_lists_only_callers_sessions() {
    let app = setup();
    app.state.sessions.create("s-a1", "alice", "one.pdf").await.unwrap();
    app.state.sessions.create("s-b1", "bob", "two.pdf").await.unwrap();
    app.state.sessions.create("s-a2", "alice", "three.pdf").await.unwrap();

    let token = token_for("alice", 3600);
    let (status, body) = send(&app, get("/api/sessions", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);

    let sessions = body["sessions"].as_array().unwrap();
    let ids: Vec<&str> = sessions
        .iter()
        .map(|s| s["session_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["s-a1", "s-a2"]);
    assert!(sessions.iter().all(|s| s["user_id"] == "alice"));
}
