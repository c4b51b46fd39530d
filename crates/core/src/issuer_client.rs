//! Client for the session issuance endpoint.

use crate::error::ClientError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// A signed URL as returned by the issuance endpoint.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SignedUrl {
    pub signed_url: String,
    pub agent_id: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Anything that can hand out signed URLs and end provider sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionIssuance: Send + Sync {
    async fn request_signed_url(&self) -> Result<SignedUrl, ClientError>;

    async fn end_session(&self, conversation_id: &str) -> Result<(), ClientError>;
}

/// Talks to the `/voice-session` endpoint of the relay service.
#[derive(Clone, Debug)]
pub struct IssuerClient {
    client: Client,
    endpoint: Url,
}

impl IssuerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ClientError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SessionIssuance for IssuerClient {
    async fn request_signed_url(&self) -> Result<SignedUrl, ClientError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "action": "get_signed_url" }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            warn!(status = status.as_u16(), %message, "Signed URL request rejected");
            return Err(ClientError::Issuance {
                status: status.as_u16(),
                message,
            });
        }

        let signed: SignedUrl = response.json().await?;
        info!(agent_id = %signed.agent_id, "Received signed URL");
        Ok(signed)
    }

    async fn end_session(&self, conversation_id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "action": "end_session", "conversationId": conversation_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Issuance {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    async fn client_for(server: &MockServer) -> IssuerClient {
        IssuerClient::new(
            &format!("{}/voice-session", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_signed_url_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/voice-session"))
            .and(body_json(json!({ "action": "get_signed_url" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signed_url": "wss://api.elevenlabs.io/v1/convai/conversation?token=abc",
                "agent_id": "agent_1",
                "voice_id": "voice_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let signed = client_for(&server).await.request_signed_url().await.unwrap();
        assert_eq!(
            signed.signed_url,
            "wss://api.elevenlabs.io/v1/convai/conversation?token=abc"
        );
        assert_eq!(signed.voice_id.as_deref(), Some("voice_1"));
    }

    #[tokio::test]
    async fn test_request_signed_url_surfaces_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": "Missing ElevenLabs configuration" })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .request_signed_url()
            .await
            .unwrap_err();
        match err {
            ClientError::Issuance { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Missing ElevenLabs configuration");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_session_sends_conversation_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(
                json!({ "action": "end_session", "conversationId": "conv_9" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).await.end_session("conv_9").await.unwrap();
    }

    #[test]
    fn test_bad_endpoint_is_reported_as_endpoint_error() {
        assert!(matches!(
            IssuerClient::new("not a url", Duration::from_secs(1)),
            Err(ClientError::InvalidEndpoint(_))
        ));
    }
}
