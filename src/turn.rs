//! The per-mode turn log.
//!
//! Turns are append-only. The only mutation after creation is the single
//! transition out of `Pending`, into either `Resolved` or `Failed`.

use ai_therapist_types::audio::Base64EncodedAudioBytes;
use ai_therapist_types::{CrisisBanner, Reply};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::capture::AudioPayload;

/// Shown in place of a reply when the backend round trip fails.
pub const APOLOGY_TEXT: &str = "Sorry, something went wrong. Please try again.";

pub type TurnId = Uuid;

/// The two independent interaction modes, each with its own turn log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Text,
    Voice,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Text => f.write_str("text"),
            Mode::Voice => f.write_str("voice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Text(String),
    Audio(AudioPayload),
}

/// The assistant side of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyRecord {
    pub text: String,
    pub audio: Option<Base64EncodedAudioBytes>,
    pub crisis: bool,
    pub banner: Option<CrisisBanner>,
    pub created_at: DateTime<Utc>,
}

impl ReplyRecord {
    pub fn from_reply(reply: &Reply) -> Self {
        Self {
            text: reply.reply_text().to_string(),
            audio: reply.reply_audio_base64().map(str::to_string),
            crisis: reply.crisis(),
            banner: reply.banner().cloned(),
            created_at: Utc::now(),
        }
    }

    pub fn apology() -> Self {
        Self {
            text: APOLOGY_TEXT.to_string(),
            audio: None,
            crisis: false,
            banner: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    Pending,
    Resolved(ReplyRecord),
    Failed(ReplyRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub id: TurnId,
    pub mode: Mode,
    /// `None` for the opening turn that only fetches a greeting.
    pub user: Option<UserInput>,
    pub status: TurnStatus,
    pub submitted_at: DateTime<Utc>,
}

impl Turn {
    pub fn reply(&self) -> Option<&ReplyRecord> {
        match &self.status {
            TurnStatus::Pending => None,
            TurnStatus::Resolved(reply) | TurnStatus::Failed(reply) => Some(reply),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, TurnStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TurnStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnLog {
    turns: Vec<Turn>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pending(&mut self, mode: Mode, user: Option<UserInput>) -> TurnId {
        let id = Uuid::new_v4();
        self.turns.push(Turn {
            id,
            mode,
            user,
            status: TurnStatus::Pending,
            submitted_at: Utc::now(),
        });
        id
    }

    /// Attaches a reply to a pending turn. Returns false if the turn is unknown
    /// or already settled.
    pub fn resolve(&mut self, id: TurnId, reply: ReplyRecord) -> bool {
        self.settle(id, TurnStatus::Resolved(reply))
    }

    pub fn fail(&mut self, id: TurnId, reply: ReplyRecord) -> bool {
        self.settle(id, TurnStatus::Failed(reply))
    }

    fn settle(&mut self, id: TurnId, status: TurnStatus) -> bool {
        match self.turns.iter_mut().find(|turn| turn.id == id) {
            Some(turn) if turn.is_pending() => {
                turn.status = status;
                true
            }
            Some(_) => {
                tracing::warn!("turn {id} already settled, ignoring");
                false
            }
            None => {
                tracing::warn!("unknown turn {id}");
                false
            }
        }
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
