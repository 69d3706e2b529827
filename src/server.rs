//! HTTP API for uploading PDFs and chatting with them.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`  | `/` | none | Liveness message |
//! | `GET`  | `/api/health` | none | Health check (returns version) |
//! | `POST` | `/api/auth/signup` | none | Register with the identity provider |
//! | `POST` | `/api/auth/login` | none | Exchange credentials for an access token |
//! | `POST` | `/api/upload` | bearer | Upload a PDF (multipart field `file`) |
//! | `POST` | `/api/chat` | bearer | Ask a question about an owned session |
//! | `GET`  | `/api/sessions` | bearer | List the caller's sessions |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "detail": "Only PDF files are allowed", "code": "bad_request" }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `unprocessable` (422), `config` (500), `internal` (500).
//!
//! Provider and I/O failures are logged in full and answered with a
//! generic message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser client
//! can be served from anywhere.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, FromRequestParts, Multipart, State,
    },
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{AuthError, AuthGateway};
use crate::chat::{ChatEngine, ChatError};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::llm::{create_chat_model, ChatModel};
use crate::models::{AuthUser, ChatAnswer, ChatRequest, Credentials, Session};
use crate::pdf::{PdfProcessor, ProcessError};
use crate::provider::ProviderError;
use crate::sessions::SessionRegistry;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub auth: Arc<AuthGateway>,
    pub processor: Arc<PdfProcessor>,
    pub chat: Arc<ChatEngine>,
}

impl AppState {
    /// Assemble state around explicit model clients. Loads the session
    /// registry from `config.sessions.path`.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let sessions = SessionRegistry::load(config.sessions.path.clone())?;
        let auth = AuthGateway::new(&config.auth)?;
        let processor = Arc::new(PdfProcessor::new(config.clone(), embedder.clone()));
        let chat = ChatEngine::new(config.clone(), processor.clone(), embedder, chat_model);

        Ok(Self {
            config,
            sessions: Arc::new(sessions),
            auth: Arc::new(auth),
            processor,
            chat: Arc::new(chat),
        })
    }

    /// State with the embedding and chat providers named in the config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(config)?;
        let chat_model = create_chat_model(config)?;
        Self::new(config.clone(), embedder, chat_model)
    }
}

/// Build the router with all routes and layers attached.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/api/health", get(handle_health))
        .route("/api/auth/signup", post(handle_signup))
        .route("/api/auth/login", post(handle_login))
        .route("/api/upload", post(handle_upload))
        .route("/api/chat", post(handle_chat))
        .route("/api/sessions", get(handle_sessions))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    tracing::info!(
        sessions = state.sessions.len(),
        index_root = %config.index.root.display(),
        embedding = %config.embedding.provider,
        llm = %config.llm.provider,
        "state loaded"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "PDF chat API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    code: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.message,
            code: self.code.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

fn unprocessable(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err.status_code() {
            400 => bad_request(err.to_string()),
            401 => AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string()),
            _ => AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "config", err.to_string()),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        if err.is_configuration() {
            return AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "config", err.to_string());
        }
        tracing::error!(error = %err, "provider call failed");
        internal("Upstream model provider request failed")
    }
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::EmptyText | ProcessError::NoChunks | ProcessError::Extract(_) => {
                bad_request(err.to_string())
            }
            ProcessError::Provider(e) => e.into(),
            other => {
                tracing::error!(error = %other, "PDF processing failed");
                internal("Error processing PDF")
            }
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Provider(e) => e.into(),
            ChatError::Index(e) => {
                tracing::error!(error = %e, "failed to open session index");
                internal("Error reading session index")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        internal("Internal server error")
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let code = if status == StatusCode::UNPROCESSABLE_ENTITY {
            "unprocessable"
        } else {
            "bad_request"
        };
        AppError::new(status, code, rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), "bad_request", err.body_text())
    }
}

// ============ Authentication ============

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub AuthUser);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AuthError::MissingToken)?;

        match state.auth.verify_token(token).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(e) => {
                tracing::warn!(reason = %e, "rejected bearer token");
                Err(e.into())
            }
        }
    }
}

/// Token from an `Authorization` value. The scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn check_email(email: &str) -> Result<(), AppError> {
    if email.contains('@') {
        Ok(())
    } else {
        Err(unprocessable("value is not a valid email address"))
    }
}

// ============ GET / and /api/health ============

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "PDF Chat API is running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /api/auth/* ============

#[derive(Serialize)]
struct SignupResponse {
    message: &'static str,
    user: Value,
    session: Value,
}

async fn handle_signup(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<SignupResponse>, AppError> {
    let Json(creds) = payload?;
    check_email(&creds.email)?;

    let result = state.auth.signup(&creds.email, &creds.password).await?;
    tracing::info!("user signed up");

    Ok(Json(SignupResponse {
        message: "User created successfully",
        user: result.user,
        session: result.session,
    }))
}

#[derive(Serialize)]
struct LoginResponse {
    message: &'static str,
    access_token: String,
    user: Value,
    user_id: String,
}

async fn handle_login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(creds) = payload?;
    check_email(&creds.email)?;

    let result = state.auth.login(&creds.email, &creds.password).await?;
    tracing::info!(user_id = %result.user_id, "user logged in");

    Ok(Json(LoginResponse {
        message: "Login successful",
        access_token: result.access_token,
        user: result.user,
        user_id: result.user_id,
    }))
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    session_id: String,
    filename: String,
    status: String,
    chunks: usize,
    message: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|_| bad_request("No file uploaded"))?;

    let mut upload: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            upload = Some((filename, data));
            break;
        }
    }

    let (filename, data) = upload.ok_or_else(|| bad_request("No file uploaded"))?;
    if !filename.ends_with(".pdf") {
        return Err(bad_request("Only PDF files are allowed"));
    }

    let session_id = Uuid::new_v4().to_string();
    tracing::info!(
        %session_id,
        user_id = %user.id,
        %filename,
        bytes = data.len(),
        "upload received"
    );

    let upload_dir = &state.config.server.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| anyhow::anyhow!("create {}: {}", upload_dir.display(), e))?;
    let path = upload_dir.join(format!("{}.pdf", session_id));
    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| anyhow::anyhow!("write {}: {}", path.display(), e))?;

    let outcome = state.processor.process_pdf(&session_id, &path).await?;
    state
        .sessions
        .create(&session_id, &user.id, &filename)
        .await?;

    Ok(Json(UploadResponse {
        session_id,
        filename,
        status: outcome.status,
        chunks: outcome.chunks,
        message: outcome.message,
    }))
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatAnswer>, AppError> {
    let Json(req) = payload?;

    if !state.sessions.verify_ownership(&req.session_id, &user.id) {
        tracing::warn!(
            session_id = %req.session_id,
            user_id = %user.id,
            "chat on session not owned by caller"
        );
        return Err(forbidden("You don't have access to this session"));
    }

    let answer = state.chat.get_answer(&req.session_id, &req.question).await?;
    Ok(Json(answer))
}

// ============ GET /api/sessions ============

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

async fn handle_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.list_for_user(&user.id),
    })
}
