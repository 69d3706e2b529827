//! Identity provider gateway (GoTrue-compatible REST API).
//!
//! Sign-up and login are proxied to the provider. Bearer tokens are
//! verified locally when a JWT secret is configured (HS256, expiry
//! checked, audience ignored) and by a `GET /auth/v1/user` round-trip
//! otherwise.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`AuthGateway::signup`] | `POST {url}/auth/v1/signup` |
//! | [`AuthGateway::login`] | `POST {url}/auth/v1/token?grant_type=password` |
//! | [`AuthGateway::verify_token`] (no secret) | `GET {url}/auth/v1/user` |
//!
//! Every request carries the `apikey` header.

use std::time::Duration;

use anyhow::Result;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::models::AuthUser;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingToken,

    #[error("Supabase credentials not configured")]
    NotConfigured,

    #[error("{0}")]
    SignupFailed(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Login failed - no session")]
    NoSession,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token: {0}")]
    MalformedToken(String),

    #[error("Invalid or expired token")]
    Unverifiable,
}

impl AuthError {
    /// HTTP status the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::NotConfigured => 500,
            AuthError::SignupFailed(_) => 400,
            _ => 401,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupResult {
    pub user: Value,
    pub session: Value,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: Value,
    pub access_token: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    email: Option<String>,
}

pub struct AuthGateway {
    url: Option<String>,
    key: Option<String>,
    jwt_secret: Option<String>,
    client: reqwest::Client,
}

impl AuthGateway {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            url: config.url.as_ref().map(|u| u.trim_end_matches('/').to_string()),
            key: config.key.clone(),
            jwt_secret: config.jwt_secret.clone(),
            client,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), AuthError> {
        match (self.url.as_deref(), self.key.as_deref()) {
            (Some(url), Some(key)) => Ok((url, key)),
            _ => Err(AuthError::NotConfigured),
        }
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<SignupResult, AuthError> {
        let (url, key) = self.credentials()?;

        let response = self
            .client
            .post(format!("{}/auth/v1/signup", url))
            .header("apikey", key)
            .json(&json!({ "email": email, "password": password, "data": {} }))
            .send()
            .await
            .map_err(|e| AuthError::SignupFailed(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "signup rejected by identity provider");
            return Err(AuthError::SignupFailed(provider_message(&body, status.as_u16())));
        }

        Ok(shape_signup(body))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, AuthError> {
        let (url, key) = self.credentials()?;

        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=password", url))
            .header("apikey", key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "login rejected by identity provider");
            return Err(AuthError::InvalidCredentials(provider_message(
                &body,
                status.as_u16(),
            )));
        }

        shape_login(body)
    }

    /// Resolve a bearer token to the user it was issued for.
    pub async fn verify_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        match self.jwt_secret.as_deref() {
            Some(secret) => verify_jwt(token, secret),
            None => self.verify_remote(token).await,
        }
    }

    async fn verify_remote(&self, token: &str) -> Result<AuthUser, AuthError> {
        let (url, key) = self.credentials()?;

        let response = self
            .client
            .get(format!("{}/auth/v1/user", url))
            .header("apikey", key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "identity provider unreachable");
                AuthError::Unverifiable
            })?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidToken);
        }

        let user: Value = response.json().await.map_err(|_| AuthError::Unverifiable)?;
        match user.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(AuthUser {
                id: id.to_string(),
                email: user.get("email").and_then(Value::as_str).map(str::to_string),
            }),
            _ => Err(AuthError::InvalidToken),
        }
    }
}

fn verify_jwt(token: &str, secret: &str) -> Result<AuthUser, AuthError> {
    // Expiry is enforced exactly and only when present; `exp` is not mandatory.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::MalformedToken(e.to_string()),
        })?;

    match data.claims.sub.filter(|s| !s.is_empty()) {
        Some(id) => Ok(AuthUser {
            id,
            email: data.claims.email,
        }),
        None => Err(AuthError::InvalidToken),
    }
}

/// A response with an `access_token` is a session whose `user` is the
/// user; anything else is the user itself, awaiting confirmation.
fn shape_signup(body: Value) -> SignupResult {
    if body.get("access_token").is_some() {
        SignupResult {
            user: body.get("user").cloned().unwrap_or(Value::Null),
            session: body,
        }
    } else {
        SignupResult {
            user: body,
            session: Value::Null,
        }
    }
}

fn shape_login(body: Value) -> Result<LoginResult, AuthError> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::NoSession)?
        .to_string();

    let user = body.get("user").cloned().unwrap_or(Value::Null);
    let user_id = user
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(LoginResult {
        user,
        access_token,
        user_id,
    })
}

/// GoTrue has used `msg`, `error_description`, `message` and `error` for
/// the human-readable part over its versions.
fn provider_message(body: &Value, status: u16) -> String {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("identity provider returned {}", status))
}
