use ai_therapist_types::{Reply, SessionId, TextTurnRequest};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::capture::AudioPayload;
use crate::error::TransportError;

mod config;
mod consts;
mod offline;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use consts::{TEXT_TURN_PATH, VOICE_TURN_PATH};
pub use offline::OfflineBackend;

/// A recorded utterance plus the same context fields as a text turn.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceTurn {
    audio: AudioPayload,
    is_first: bool,
    session_id: Option<SessionId>,
}

impl VoiceTurn {
    pub fn new(audio: AudioPayload) -> Self {
        Self {
            audio,
            is_first: false,
            session_id: None,
        }
    }

    pub fn with_first_turn(mut self, is_first: bool) -> Self {
        self.is_first = is_first;
        self
    }

    pub fn with_session_id(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn audio(&self) -> &AudioPayload {
        &self.audio
    }

    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }
}

/// One round trip per call. Implementations never retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    async fn submit_text(&self, turn: TextTurnRequest) -> Result<Reply, TransportError>;

    async fn submit_audio(&self, turn: VoiceTurn) -> Result<Reply, TransportError>;
}

/// HTTP client for the `/chat/text` and `/chat/voice` endpoints.
#[derive(Debug, Clone)]
pub struct DialogueClient {
    http: reqwest::Client,
    config: Config,
}

impl DialogueClient {
    pub fn new(config: Config) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn read_reply(response: reqwest::Response) -> Result<Reply, TransportError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::warn!("backend returned {status}");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let reply: Reply = serde_json::from_str(&body)?;
        tracing::debug!(
            "reply received, crisis: {}, audio: {}",
            reply.crisis(),
            reply.reply_audio_base64().is_some()
        );
        Ok(reply)
    }
}

#[async_trait]
impl DialogueBackend for DialogueClient {
    async fn submit_text(&self, turn: TextTurnRequest) -> Result<Reply, TransportError> {
        if turn.user_input().is_empty() && !turn.is_first() {
            return Err(TransportError::Rejected("empty text outside the opening turn"));
        }

        tracing::debug!(
            "POST {TEXT_TURN_PATH}, first: {}, session: {:?}",
            turn.is_first(),
            turn.session_id()
        );
        let response = self
            .http
            .post(utils::build_url(&self.config, TEXT_TURN_PATH))
            .json(&turn)
            .send()
            .await?;
        Self::read_reply(response).await
    }

    async fn submit_audio(&self, turn: VoiceTurn) -> Result<Reply, TransportError> {
        if turn.audio().is_empty() {
            return Err(TransportError::Rejected("empty audio payload"));
        }

        tracing::debug!(
            "POST {VOICE_TURN_PATH}, {} bytes, session: {:?}",
            turn.audio().len(),
            turn.session_id()
        );
        let form = utils::build_voice_form(&turn)?;
        let response = self
            .http
            .post(utils::build_url(&self.config, VOICE_TURN_PATH))
            .multipart(form)
            .send()
            .await?;
        Self::read_reply(response).await
    }
}
