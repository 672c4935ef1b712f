//! Client API façade for Kamu resource backends.
//!
//! The single point of contact between a UI and the REST API: attaches the
//! stored bearer token, turns error bodies into [`ApiError`], and on a 401
//! clears the stored credentials and tells the [`SessionObserver`] to send
//! the user to the login route.
//!
//! # Example
//!
//! ```rust,ignore
//! use kamu_client::{ApiClient, FileCredentialStore, ListQuery, Page};
//! use std::sync::Arc;
//!
//! let client = ApiClient::new(
//!     "http://localhost:8080",
//!     Arc::new(FileCredentialStore::new("credentials.json")),
//! );
//!
//! let page: Page<Budget> = client.list("budgets", &ListQuery::default()).await?;
//! let budget: Budget = client.create("budgets", &new_budget).await?;
//! ```

pub mod credentials;
pub mod error;
pub mod session;

pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ApiError, Result, GENERIC_ERROR_MESSAGE};
pub use reqwest::Method;
pub use session::{LogSessionObserver, SessionObserver, DEFAULT_LOGIN_ROUTE};

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// `?limit=&after=` for list calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl ListQuery {
    /// The query for the page after `page`, if there is one.
    pub fn next<T>(&self, page: &Page<T>) -> Option<Self> {
        page.next_cursor.as_ref().map(|cursor| Self {
            limit: self.limit,
            after: Some(cursor.clone()),
        })
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http_client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    observer: Arc<dyn SessionObserver>,
    login_route: String,
}

impl ApiClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            observer: Arc::new(LogSessionObserver),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    /// Use a preconfigured reqwest client (timeouts, proxies).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// Issue a request and return the JSON body (`Null` for empty bodies).
    ///
    /// `path` is relative to the base URL, e.g. `/api/budgets`.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.send(method, path, None, body).await
    }

    pub async fn list<T: DeserializeOwned>(&self, kind: &str, query: &ListQuery) -> Result<Page<T>> {
        self.send(Method::GET, &collection(kind), Some(query), None)
            .await
    }

    pub async fn get<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<T> {
        self.send(Method::GET, &item(kind, id), None, None).await
    }

    pub async fn create<B: Serialize, T: DeserializeOwned>(&self, kind: &str, body: &B) -> Result<T> {
        let body = to_json(body)?;
        self.send(Method::POST, &collection(kind), None, Some(&body))
            .await
    }

    /// Replace all writable fields (PUT).
    pub async fn update<B: Serialize, T: DeserializeOwned>(
        &self,
        kind: &str,
        id: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_json(body)?;
        self.send(Method::PUT, &item(kind, id), None, Some(&body))
            .await
    }

    /// Merge fields (PATCH); `null` clears a field.
    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        kind: &str,
        id: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_json(body)?;
        self.send(Method::PATCH, &item(kind, id), None, Some(&body))
            .await
    }

    pub async fn delete(&self, kind: &str, id: &str) -> Result<()> {
        self.send::<Value>(Method::DELETE, &item(kind, id), None, None)
            .await
            .map(|_| ())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&ListQuery>,
        body: Option<&Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.request(method.clone(), &url);
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(token) = self.credentials.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        // Before the body read, so a truncated 401 still logs out.
        if status == StatusCode::UNAUTHORIZED {
            self.end_session();
        }
        let text = response.text().await?;

        if !status.is_success() {
            tracing::debug!(%method, path, status = status.as_u16(), "API request failed");
            return Err(ApiError::from_response(status.as_u16(), &text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Clear credentials and notify the observer. Runs once per 401.
    fn end_session(&self) {
        if let Err(e) = self.credentials.clear() {
            tracing::warn!(error = %e, "Failed to clear credentials after 401");
        }
        self.observer.session_expired(&self.login_route);
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| ApiError::Parse(e.to_string()))
}

fn collection(kind: &str) -> String {
    format!("/api/{}", kind)
}

fn item(kind: &str, id: &str) -> String {
    format!("/api/{}/{}", kind, id)
}
