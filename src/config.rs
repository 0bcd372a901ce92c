//! Connection settings for the iland cloud API.

use crate::error::{Error, Result};
use std::env;

pub const DEFAULT_API_URL: &str = "https://api.ilandcloud.com/ecs";
pub const DEFAULT_TOKEN_URL: &str =
    "https://console.ilandcloud.com/auth/realms/iland-core/protocol/openid-connect/token";

/// Credentials and endpoints needed to talk to iland. Immutable once handed to a [`crate::Vm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    pub token_url: String,
}

impl Config {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: DEFAULT_API_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Reads the configuration from `ILAND_*` environment variables. Call `dotenvy::dotenv()`
    /// beforehand if the values live in a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &'static str| lookup(key).ok_or(Error::MissingEnv(key));
        let mut config = Self::new(
            require("ILAND_USERNAME")?,
            require("ILAND_PASSWORD")?,
            require("ILAND_CLIENT_ID")?,
            require("ILAND_CLIENT_SECRET")?,
        );
        if let Some(url) = lookup("ILAND_API_URL") {
            config.api_url = url;
        }
        if let Some(url) = lookup("ILAND_TOKEN_URL") {
            config.token_url = url;
        }
        Ok(config)
    }
}
