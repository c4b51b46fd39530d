//! Signed Session Issuer
//!
//! Mints single-use conversation URLs from the voice provider and ends provider
//! sessions. Credentials are checked on every call, before any network I/O,
//! and nothing is retried: a failure goes straight back to the caller.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

/// Header carrying the provider API key.
const API_KEY_HEADER: &str = "xi-api-key";

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// The API key or the agent id is not configured.
    #[error("Missing ElevenLabs configuration")]
    Configuration,
    /// The provider answered with a non-success status. The body is kept verbatim.
    #[error("provider responded with status {status}")]
    Upstream { status: u16, body: String },
    /// The request never produced a usable response.
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A freshly issued session credential.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedSession {
    pub signed_url: String,
    pub agent_id: String,
    pub voice_id: Option<String>,
}

/// The contract for anything that issues and ends provider sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Fails with `IssueError::Configuration` when credentials are missing.
    fn check_configuration(&self) -> Result<(), IssueError>;

    /// Requests a signed URL for the configured agent.
    async fn request_signed_url(&self) -> Result<SignedSession, IssueError>;

    /// Asks the provider to delete a conversation.
    async fn end_session(&self, conversation_id: &str) -> Result<(), IssueError>;
}

#[derive(Deserialize)]
struct SignedUrlBody {
    signed_url: String,
}

/// `SessionIssuer` backed by the ElevenLabs Conversational AI API.
pub struct ElevenLabsIssuer {
    client: Client,
    api_base: String,
    api_key: Option<SecretString>,
    agent_id: Option<String>,
    voice_id: Option<String>,
}

impl ElevenLabsIssuer {
    pub fn from_config(config: &Config) -> Result<Self, IssueError> {
        let client = Client::builder().timeout(config.issuer_timeout).build()?;
        Ok(Self {
            client,
            api_base: config.elevenlabs_api_base.clone(),
            api_key: config.elevenlabs_api_key.clone(),
            agent_id: config.agent_id.clone(),
            voice_id: config.voice_id.clone(),
        })
    }

    fn credentials(&self) -> Result<(&SecretString, &str), IssueError> {
        match (&self.api_key, &self.agent_id) {
            (Some(api_key), Some(agent_id)) => Ok((api_key, agent_id.as_str())),
            _ => Err(IssueError::Configuration),
        }
    }
}

#[async_trait]
impl SessionIssuer for ElevenLabsIssuer {
    fn check_configuration(&self) -> Result<(), IssueError> {
        self.credentials().map(|_| ())
    }

    #[instrument(skip(self))]
    async fn request_signed_url(&self) -> Result<SignedSession, IssueError> {
        let (api_key, agent_id) = self.credentials()?;

        let response = self
            .client
            .get(format!(
                "{}/v1/convai/conversation/get_signed_url",
                self.api_base
            ))
            .query(&[("agent_id", agent_id)])
            .header(API_KEY_HEADER, api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), %body, "Provider rejected signed URL request");
            return Err(IssueError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let SignedUrlBody { signed_url } = response.json().await?;
        info!(%agent_id, "Issued signed URL");
        Ok(SignedSession {
            signed_url,
            agent_id: agent_id.to_string(),
            voice_id: self.voice_id.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn end_session(&self, conversation_id: &str) -> Result<(), IssueError> {
        let (api_key, _) = self.credentials()?;

        let response = self
            .client
            .delete(format!(
                "{}/v1/convai/conversation/{}",
                self.api_base, conversation_id
            ))
            .header(API_KEY_HEADER, api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "Provider did not acknowledge session end");
            return Err(IssueError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        info!("Provider session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    #[tokio::test]
    async fn test_signed_url_passes_through_unmodified() {
        let server = MockServer::start().await;
        let signed = "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=agent_123&conversation_signature=a%2Bb";
        Mock::given(method("GET"))
            .and(path("/v1/convai/conversation/get_signed_url"))
            .and(query_param("agent_id", "agent_123"))
            .and(header("xi-api-key", "xi-test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "signed_url": signed })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let issuer = ElevenLabsIssuer::from_config(&test_config(&server.uri())).unwrap();
        let session = issuer.request_signed_url().await.unwrap();

        assert_eq!(session.signed_url, signed);
        assert_eq!(session.agent_id, "agent_123");
        assert_eq!(session.voice_id.as_deref(), Some("voice_456"));
    }

    #[tokio::test]
    async fn test_missing_credentials_make_no_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri());
        config.elevenlabs_api_key = None;
        let issuer = ElevenLabsIssuer::from_config(&config).unwrap();
        assert!(matches!(
            issuer.request_signed_url().await,
            Err(IssueError::Configuration)
        ));

        let mut config = test_config(&server.uri());
        config.agent_id = None;
        let issuer = ElevenLabsIssuer::from_config(&config).unwrap();
        assert!(matches!(
            issuer.check_configuration(),
            Err(IssueError::Configuration)
        ));
        assert!(matches!(
            issuer.request_signed_url().await,
            Err(IssueError::Configuration)
        ));
    }

    #[tokio::test]
    async fn test_upstream_rejection_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"detail":"invalid key"}"#))
            .mount(&server)
            .await;

        let issuer = ElevenLabsIssuer::from_config(&test_config(&server.uri())).unwrap();
        match issuer.request_signed_url().await {
            Err(IssueError::Upstream { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"detail":"invalid key"}"#);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_session_issues_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/convai/conversation/conv_42"))
            .and(header("xi-api-key", "xi-test-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let issuer = ElevenLabsIssuer::from_config(&test_config(&server.uri())).unwrap();
        issuer.end_session("conv_42").await.unwrap();
    }
}
