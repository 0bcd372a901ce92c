//! In-memory [`ApiClient`] that records every request and answers from canned responses.

use crate::client::{self, ApiClient};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<String>,
}

#[derive(Default)]
struct State {
    requests: Vec<Request>,
    responses: HashMap<(Method, String), String>,
}

/// Clones share state, so a test keeps one handle while the VM owns the other.
#[derive(Clone, Default)]
pub struct MockApi {
    state: Arc<Mutex<State>>,
}

impl MockApi {
    pub fn respond(&self, method: Method, endpoint: &str, body: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert((method, endpoint.to_string()), body.to_string());
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    fn handle(&self, method: Method, endpoint: &str, body: Option<&str>) -> client::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(Request {
            method: method.clone(),
            endpoint: endpoint.to_string(),
            body: body.map(str::to_string),
        });
        match state.responses.get(&(method.clone(), endpoint.to_string())) {
            Some(response) => Ok(response.clone()),
            None => Err(client::Error::Api {
                method,
                endpoint: endpoint.to_string(),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            }),
        }
    }
}

#[async_trait]
impl ApiClient for MockApi {
    fn from_config(_config: &Config) -> Self {
        Self::default()
    }

    async fn get(&self, endpoint: &str) -> client::Result<String> {
        self.handle(Method::GET, endpoint, None)
    }

    async fn post(&self, endpoint: &str, body: Option<&str>) -> client::Result<String> {
        self.handle(Method::POST, endpoint, body)
    }

    async fn delete(&self, endpoint: &str) -> client::Result<String> {
        self.handle(Method::DELETE, endpoint, None)
    }
}
