use std::time::Duration;

use ai_therapist_types::{Reply, SessionId, TextTurnRequest};
use async_trait::async_trait;
use uuid::Uuid;

use crate::client::{DialogueBackend, VoiceTurn};
use crate::error::TransportError;

const GREETING: &str = "Hi, how can I help you today?";
const TEXT_REPLY: &str =
    "Thanks for sharing that. I'm here with you. What's one small step we could explore together?";
const VOICE_REPLY: &str =
    "That makes sense. What do you notice in your body when anxiety shows up?";

/// Canned replies for running without a backend.
///
/// Mirrors the reply contract: a fresh session id is issued when the turn
/// carries none, and the turn's own id is echoed otherwise. Never flags crisis
/// and never returns audio.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    text_latency: Duration,
    voice_latency: Duration,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self {
            text_latency: Duration::from_millis(500),
            voice_latency: Duration::from_millis(800),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.text_latency = latency;
        self.voice_latency = latency;
        self
    }

    fn session_for(session_id: Option<&SessionId>) -> SessionId {
        session_id
            .cloned()
            .unwrap_or_else(|| SessionId::new(format!("offline-{}", Uuid::new_v4())))
    }
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialogueBackend for OfflineBackend {
    async fn submit_text(&self, turn: TextTurnRequest) -> Result<Reply, TransportError> {
        tokio::time::sleep(self.text_latency).await;
        let text = if turn.is_first() { GREETING } else { TEXT_REPLY };
        Ok(Reply::new(text).with_session_id(Self::session_for(turn.session_id())))
    }

    async fn submit_audio(&self, turn: VoiceTurn) -> Result<Reply, TransportError> {
        if turn.audio().is_empty() {
            return Err(TransportError::Rejected("empty audio payload"));
        }
        tokio::time::sleep(self.voice_latency).await;
        Ok(Reply::new(VOICE_REPLY).with_session_id(Self::session_for(turn.session_id())))
    }
}
