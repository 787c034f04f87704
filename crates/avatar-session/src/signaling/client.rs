//! HTTP client for the avatar control API
//!
//! Issues the signaling exchanges (create, answer, ice, speak, stop) as JSON
//! POST requests authenticated with a static API-key header. The client
//! holds no state beyond its configuration; the session identifier is passed
//! in by the caller on every call.

use super::protocol::*;
use crate::config::ApiConfig;
use crate::error::{Error, RemoteServiceKind, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// Control API operations needed to run one avatar session
///
/// Implemented by [`HttpNegotiationClient`]; tests substitute their own
/// implementation.
#[async_trait]
pub trait NegotiationApi: Send + Sync {
    /// Open a remote session and receive its SDP offer
    async fn create_session(&self, params: &CreateSessionParams) -> Result<CreatedSession>;

    /// Submit the local SDP answer
    async fn submit_answer(&self, session_id: &str, answer: &SessionDescription) -> Result<()>;

    /// Relay one locally gathered ICE candidate
    async fn submit_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()>;

    /// Ask the avatar to speak `text`
    async fn request_speech(&self, session_id: &str, text: &str) -> Result<SpeechReceipt>;

    /// Close the remote session
    async fn stop_session(&self, session_id: &str) -> Result<()>;
}

/// reqwest-backed [`NegotiationApi`]
#[derive(Debug)]
pub struct HttpNegotiationClient {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpNegotiationClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL is not http(s) or the
    /// underlying client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "base_url must start with http:// or https://, got: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// POST a JSON body and return the raw successful response
    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.config.url(path);
        debug!("POST {} ({})", url, operation);

        let response = self
            .client
            .post(&url)
            .header(self.config.api_key_header.as_str(), self.config.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::remote(
                operation,
                status.as_u16(),
                format!(
                    "HTTP {} {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    error_text
                ),
            ));
        }

        Ok(response)
    }

    /// POST and decode the `data` envelope of the response
    async fn post_json<B, T>(&self, operation: &'static str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(operation, path, body).await?;
        let envelope: Envelope<T> = response.json().await.map_err(|e| Error::RemoteService {
            operation,
            status: None,
            kind: RemoteServiceKind::ServerError,
            message: format!("Failed to parse response: {}", e),
        })?;
        Ok(envelope.data)
    }
}

/// Map a reqwest transport failure; connect and timeout failures count as
/// the service being unavailable.
fn request_error(operation: &'static str, err: reqwest::Error) -> Error {
    let kind = if err.is_connect() || err.is_timeout() {
        RemoteServiceKind::Unavailable
    } else {
        RemoteServiceKind::ServerError
    };
    Error::RemoteService {
        operation,
        status: err.status().map(|s| s.as_u16()),
        kind,
        message: format!("HTTP request failed: {}", err),
    }
}

#[async_trait]
impl NegotiationApi for HttpNegotiationClient {
    #[instrument(skip(self, params), fields(avatar_id = %params.avatar_id))]
    async fn create_session(&self, params: &CreateSessionParams) -> Result<CreatedSession> {
        let body = CreateRequest {
            quality: params.quality,
            avatar_name: &params.avatar_id,
            voice: params
                .voice_id
                .as_deref()
                .map(|voice_id| VoiceSelection { voice_id }),
        };

        let resp: CreateResponse = self
            .post_json("create", &self.config.endpoints.create, &body)
            .await?;

        if resp.sdp.sdp_type != "offer" {
            return Err(Error::Negotiation(format!(
                "expected an SDP offer from the service, got {}",
                resp.sdp.sdp_type
            )));
        }

        debug!(
            "Remote session {} created with {} ICE servers",
            resp.session_id,
            resp.ice_servers.len()
        );
        Ok(resp.into())
    }

    #[instrument(skip(self, answer))]
    async fn submit_answer(&self, session_id: &str, answer: &SessionDescription) -> Result<()> {
        let body = AnswerRequest {
            session_id,
            sdp: answer,
        };
        self.post("answer", &self.config.endpoints.answer, &body)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, candidate))]
    async fn submit_ice_candidate(&self, session_id: &str, candidate: &IceCandidate) -> Result<()> {
        let body = IceRequest {
            session_id,
            candidate,
        };
        self.post("ice", &self.config.endpoints.ice, &body).await?;
        Ok(())
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn request_speech(&self, session_id: &str, text: &str) -> Result<SpeechReceipt> {
        let body = SpeakRequest { session_id, text };
        let resp: SpeakResponse = self
            .post_json("speak", &self.config.endpoints.speak, &body)
            .await?;

        let duration_ms = match resp.duration_ms {
            Some(ms) if ms.is_finite() && ms >= 0.0 => Some(ms.round() as u64),
            Some(ms) => {
                warn!("Ignoring invalid duration_ms {} for session {}", ms, session_id);
                None
            }
            None => None,
        };

        Ok(SpeechReceipt { duration_ms })
    }

    #[instrument(skip(self))]
    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let body = StopRequest { session_id };
        self.post("stop", &self.config.endpoints.stop, &body).await?;
        Ok(())
    }
}
