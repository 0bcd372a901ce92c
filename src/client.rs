//! HTTP plumbing for the iland ECS API. [`ApiClient`] is the seam the VM adapter talks through,
//! [`IlandClient`] is the production implementation on top of reqwest.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

const API_MEDIA_TYPE: &str = "application/vnd.ilandcloud.api.v0.8+json";
/// iland prefixes JSON bodies with this guard against cross-site script inclusion.
const XSSI_PREFIX: &str = ")]}'";
/// Tokens are renewed a little before the server-side expiry.
const TOKEN_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("iland api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("iland api {method} {endpoint} returned {status}: {body}")]
    Api {
        method: Method,
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("iland token request returned {status}: {body}")]
    Token { status: StatusCode, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Minimal REST surface the adapter needs. Every call returns the raw response body.
#[async_trait]
pub trait ApiClient: Send + Sync {
    fn from_config(config: &Config) -> Self
    where
        Self: Sized;

    async fn get(&self, endpoint: &str) -> Result<String>;
    /// `None` sends no body and no `Content-Type`, as the power actions expect.
    async fn post(&self, endpoint: &str, body: Option<&str>) -> Result<String>;
    async fn delete(&self, endpoint: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct Token {
    access_token: String,
    expires_at: Instant,
}

impl Token {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_SLACK);
        Self {
            access_token: response.access_token,
            expires_at: now + lifetime,
        }
    }

    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub struct IlandClient {
    config: Config,
    http: reqwest::Client,
    token: Mutex<Option<Token>>,
}

impl IlandClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.config.api_url.trim_end_matches('/'))
    }

    fn cached_token(&self) -> Option<String> {
        let token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        token
            .as_ref()
            .filter(|t| t.is_valid(Instant::now()))
            .map(|t| t.access_token.clone())
    }

    fn forget_token(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Password grant against the iland identity server. The result is cached until shortly
    /// before it expires.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }
        debug!("Requesting iland access token for {}", self.config.username);
        let resp = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Token { status, body });
        }
        let token = Token::from_response(resp.json().await?, Instant::now());
        let access_token = token.access_token.clone();
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(access_token)
    }

    async fn request(&self, method: Method, endpoint: &str, body: Option<&str>) -> Result<String> {
        let token = self.access_token().await?;
        debug!("{method} {endpoint}");
        let mut req = self
            .http
            .request(method.clone(), self.url(endpoint))
            .bearer_auth(token)
            .header(ACCEPT, API_MEDIA_TYPE);
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_owned());
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            // Revoked server side, the next request logs in again.
            self.forget_token();
        }
        if !status.is_success() {
            return Err(Error::Api {
                method,
                endpoint: endpoint.to_owned(),
                status,
                body: text,
            });
        }
        Ok(strip_xssi_prefix(&text).to_owned())
    }
}

fn strip_xssi_prefix(body: &str) -> &str {
    body.strip_prefix(XSSI_PREFIX)
        .map(str::trim_start)
        .unwrap_or(body)
}

#[async_trait]
impl ApiClient for IlandClient {
    fn from_config(config: &Config) -> Self {
        Self::new(config.clone())
    }

    async fn get(&self, endpoint: &str) -> Result<String> {
        self.request(Method::GET, endpoint, None).await
    }

    async fn post(&self, endpoint: &str, body: Option<&str>) -> Result<String> {
        self.request(Method::POST, endpoint, body).await
    }

    async fn delete(&self, endpoint: &str) -> Result<String> {
        self.request(Method::DELETE, endpoint, None).await
    }
}
