//! Driver session creation
//!
//! The UI-interaction layer lives outside this crate; it plugs in through
//! [`SessionFactory`]. [`WebDriverSessionFactory`] is the plain HTTP
//! implementation used by the `rig` binary.

use std::time::Duration;

use serde::Deserialize;

use rig_core::prelude::*;

use crate::capabilities::Capabilities;

const SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Creates and closes driver sessions against a running automation server
#[trait_variant::make(SessionFactory: Send)]
pub trait LocalSessionFactory {
    type Handle: Clone + Send + Sync;

    async fn create(&self, server_url: &str, capabilities: &Capabilities)
        -> Result<Self::Handle>;

    async fn close(&self, handle: &Self::Handle) -> Result<()>;
}

/// A session created through the W3C WebDriver protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDriverSession {
    pub server_url: String,
    pub session_id: String,
}

impl WebDriverSession {
    pub fn url(&self) -> String {
        format!("{}/session/{}", self.server_url, self.session_id)
    }
}

#[derive(Debug, Deserialize)]
struct NewSessionResponse {
    value: NewSessionValue,
}

#[derive(Debug, Deserialize)]
struct NewSessionValue {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebDriverSessionFactory {
    client: reqwest::Client,
}

impl WebDriverSessionFactory {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SESSION_TIMEOUT)
            .build()
            .map_err(|e| Error::session(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn parse_new_session(body: &str) -> Result<String> {
    let response: NewSessionResponse = serde_json::from_str(body)?;
    match response.value {
        NewSessionValue {
            session_id: Some(id),
            ..
        } => Ok(id),
        NewSessionValue { error, message, .. } => Err(Error::session(format!(
            "server refused the session: {} {}",
            error.unwrap_or_default(),
            message.unwrap_or_default()
        ))),
    }
}

impl SessionFactory for WebDriverSessionFactory {
    type Handle = WebDriverSession;

    async fn create(&self, server_url: &str, capabilities: &Capabilities) -> Result<WebDriverSession> {
        let payload = capabilities.new_session_payload()?;
        info!("Creating session on {}", server_url);

        let response = self
            .client
            .post(format!("{}/session", server_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::session(format!("POST {}/session failed: {}", server_url, e)))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::session(format!("Failed to read session response: {}", e)))?;
        let session_id = parse_new_session(&body)?;

        info!("Session {} created", session_id);
        Ok(WebDriverSession {
            server_url: server_url.to_string(),
            session_id,
        })
    }

    async fn close(&self, handle: &WebDriverSession) -> Result<()> {
        let response = self
            .client
            .delete(handle.url())
            .send()
            .await
            .map_err(|e| Error::session(format!("DELETE {} failed: {}", handle.url(), e)))?;

        if !response.status().is_success() {
            warn!(
                "Session {} did not close cleanly: {}",
                handle.session_id,
                response.status()
            );
        }
        Ok(())
    }
}
